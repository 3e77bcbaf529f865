use gridly::llm::{GeminiClient, SpreadsheetAnalyst};
use gridly::{ConfidenceLevel, GridlyError, ResilientCaller};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const API_KEY: &str = "test-key-503";
const SALES: &str = "Month,Sales\nJan,100\nFeb,150";

/// Local stand-in for the Gemini endpoint. Answers each connection with the
/// next canned response and forwards the raw request text.
struct StubServer {
    base_url: String,
    requests: mpsc::UnboundedReceiver<String>,
}

impl StubServer {
    async fn start(responses: Vec<(u16, serde_json::Value)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, requests) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                let _ = tx.send(request);

                let body = body.to_string();
                let reason = if status == 200 { "OK" } else { "Service Unavailable" };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    fn received(&mut self) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            seen.push(request);
        }
        seen
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buffer);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buffer.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn model_reply(payload: serde_json::Value) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": payload.to_string() }] },
            "finishReason": "STOP"
        }]
    })
}

fn analyst(base_url: &str, models: &[&str]) -> SpreadsheetAnalyst {
    let client = GeminiClient::new(API_KEY.to_string())
        .unwrap()
        .with_base_url(base_url);
    SpreadsheetAnalyst::new(
        client,
        ResilientCaller::default(),
        models.iter().map(|m| m.to_string()).collect(),
    )
}

#[tokio::test]
async fn test_summary_sends_key_in_header_and_caches() {
    let report = json!({
        "insights": ["Sales rose 50% from Jan to Feb"],
        "column_descriptions": [],
        "row_findings": [],
        "quality_issues": []
    });
    let mut server = StubServer::start(vec![(200, model_reply(report))]).await;
    let analyst = analyst(&server.base_url, &["gemini-2.5-flash"]);

    let first = analyst.summarize(SALES).await.unwrap();
    assert_eq!(first.insights, vec!["Sales rose 50% from Jan to Feb"]);

    let second = analyst.summarize(SALES).await.unwrap();
    assert_eq!(second, first);

    let requests = server.received();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.starts_with("POST /models/gemini-2.5-flash:generateContent HTTP/1.1"));
    assert!(!request.contains("key="));
    assert!(request
        .to_lowercase()
        .contains(&format!("x-goog-api-key: {}", API_KEY)));
    assert!(request.contains("### Document: <file name>"));
    assert!(request.contains("responseSchema"));
}

#[tokio::test]
async fn test_forecast_falls_back_to_next_model_on_overload() {
    let forecast = json!({
        "predictions": [{ "period": "Mar", "column": "Sales", "value": 175.0 }],
        "confidence": "medium",
        "assumptions": ["Growth continues linearly"],
        "summary": "Sales keep climbing."
    });
    let mut server = StubServer::start(vec![
        (503, json!({ "error": { "message": "The model is overloaded" } })),
        (200, model_reply(forecast)),
    ])
    .await;
    let analyst = analyst(&server.base_url, &["primary", "backup"]);

    let result = analyst.forecast(SALES, None).await.unwrap();
    assert_eq!(result.confidence, ConfidenceLevel::Medium);
    assert_eq!(result.predictions[0].value, 175.0);

    let requests = server.received();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].contains("/models/primary:generateContent"));
    assert!(requests[1].contains("/models/backup:generateContent"));

    let health = analyst.caller().health();
    assert!(health.is_healthy);
    assert_eq!(health.consecutive_failures, 0);
}

#[tokio::test]
async fn test_empty_question_is_rejected_without_a_request() {
    let mut server = StubServer::start(vec![]).await;
    let analyst = analyst(&server.base_url, &["gemini-2.5-flash"]);

    let err = analyst.ask(SALES, "   ", &[]).await.unwrap_err();
    assert!(matches!(err, GridlyError::PermanentService(_)));
    assert!(server.received().is_empty());
}
