use dotenv::dotenv;
use gridly::llm::{GeminiClient, SpreadsheetAnalyst};
use gridly::*;
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| "GEMINI_API_KEY must be set")?;
    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        return Err("usage: analyze_spreadsheet <file.csv|xlsx|xls>...".into());
    }

    let config = GridlyConfig::default().with_env_overrides()?;
    let session = AnalysisSession::from_batch(ingest_paths(&paths, &config.ingest).await);
    for error in &session.errors {
        println!("❌ {}", error.message);
    }

    let text = session
        .analysis_text()
        .ok_or("no spreadsheet could be ingested")?
        .to_string();

    let analyst = SpreadsheetAnalyst::from_config(GeminiClient::new(api_key)?, &config);

    println!("🤖 Summarizing {} document(s)...\n", session.documents.len());
    let report = analyst.summarize(&text).await?;
    for insight in &report.insights {
        println!("  • {}", insight);
    }
    for issue in &report.quality_issues {
        println!("  ⚠️  {}", issue);
    }

    println!("\n📈 Forecasting...\n");
    match analyst.forecast(&text, None).await {
        Ok(forecast) => {
            println!("{} (confidence: {:?})", forecast.summary, forecast.confidence);
            for point in &forecast.predictions {
                println!("  {} {}: {:.2}", point.period, point.column, point.value);
            }
        }
        Err(e) => println!("Forecast unavailable: {}", e),
    }

    println!("\n💬 Ask questions about the data (type 'quit' to exit).");
    let mut history = Vec::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut question = String::new();
        if io::stdin().read_line(&mut question)? == 0 {
            break;
        }
        let question = question.trim();
        if question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match analyst.ask(&text, question, &history).await {
            Ok(answer) => {
                println!("\n{}\n", answer.answer);
                history.push(ChatTurn {
                    role: ChatRole::User,
                    text: question.to_string(),
                });
                history.push(ChatTurn {
                    role: ChatRole::Model,
                    text: answer.answer,
                });
            }
            Err(e) => {
                println!("\n{}\n", e);
                let health = analyst.caller().health();
                if health.circuit_open {
                    println!(
                        "Service paused after {} consecutive failures.",
                        health.consecutive_failures
                    );
                }
            }
        }
    }

    Ok(())
}
