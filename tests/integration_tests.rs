use gridly::*;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn csv(name: &str, body: &str) -> UploadedFile {
    UploadedFile::new(name, Some("text/csv".to_string()), body.as_bytes().to_vec())
}

fn overloaded() -> GridlyError {
    GridlyError::ExtractionFailed("Gemini API Error (status 503 Service Unavailable)".into())
}

fn xlsx_bytes(rows: &[(&str, f64)]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.write_string(0, 0, "Month").unwrap();
    worksheet.write_string(0, 1, "Revenue").unwrap();
    for (index, (month, value)) in rows.iter().enumerate() {
        let row = index as u32 + 1;
        worksheet.write_string(row, 0, *month).unwrap();
        worksheet.write_number(row, 1, *value).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}

#[test]
fn test_normalizer_forms() {
    assert_eq!(normalize_numeric("$1,234.50"), Some(1234.50));
    assert!((normalize_numeric("12%").unwrap() - 0.12).abs() < 1e-12);
    assert_eq!(normalize_numeric("(45)"), Some(-45.0));
    for junk in ["abc", "--", "12.3.4", "Q1 2024"] {
        assert_eq!(normalize_numeric(junk), None, "{} should not parse", junk);
    }
}

#[test]
fn test_single_csv_upload_scenario() {
    let record = ingest(
        &csv("sales.csv", "Month,Sales\nJan,100\nFeb,150\n"),
        &IngestOptions::default(),
    )
    .unwrap();

    assert_eq!(record.table.numeric_columns, vec!["Sales".to_string()]);
    assert_eq!(
        record.metrics["Sales"],
        ColumnMetrics {
            total: 250.0,
            average: 125.0,
            min: 100.0,
            max: 150.0,
            trend: Trend::Increase,
        }
    );
}

#[test]
fn test_formatted_values_are_numeric() {
    let record = ingest(
        &csv(
            "budget.csv",
            "Item,Amount,Share\nRent,\"$1,200.00\",40%\nRefund,(300),-10%\nMisc,,50%\n",
        ),
        &IngestOptions::default(),
    )
    .unwrap();

    assert_eq!(
        record.table.numeric_columns,
        vec!["Amount".to_string(), "Share".to_string()]
    );
    let amount = &record.metrics["Amount"];
    assert_eq!(amount.total, 900.0);
    assert_eq!(amount.min, -300.0);
    assert_eq!(amount.trend, Trend::Decrease);
    assert!((record.metrics["Share"].total - 0.8).abs() < 1e-9);
}

#[test]
fn test_xlsx_upload_uses_first_sheet() {
    let bytes = xlsx_bytes(&[("Jan", 10.0), ("Feb", 5.0), ("Mar", 7.5)]);
    let file = UploadedFile::new("revenue.xlsx", None, bytes);

    let record = ingest(&file, &IngestOptions::default()).unwrap();
    assert_eq!(record.kind, FileKind::Xlsx);
    assert_eq!(record.table.headers, vec!["Month", "Revenue"]);
    assert_eq!(record.table.rows[0][1], Cell::Number(10.0));

    let revenue = &record.metrics["Revenue"];
    assert_eq!(revenue.total, 22.5);
    assert_eq!(revenue.max, 10.0);
    assert_eq!(revenue.trend, Trend::Decrease);
    assert_eq!(
        record.text_representation,
        "Month,Revenue\nJan,10\nFeb,5\nMar,7.5"
    );
}

#[test]
fn test_xlsx_dates_stay_text() {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let worksheet = workbook.add_worksheet();
    worksheet.write_string(0, 0, "Date").unwrap();
    worksheet.write_string(0, 1, "Sales").unwrap();
    for (index, (month, sales)) in [(1u8, 10.0), (2u8, 20.0)].iter().enumerate() {
        let row = index as u32 + 1;
        let date = ExcelDateTime::from_ymd(2024, *month, 15).unwrap();
        worksheet
            .write_datetime_with_format(row, 0, &date, &date_format)
            .unwrap();
        worksheet.write_number(row, 1, *sales).unwrap();
    }
    let bytes = workbook.save_to_buffer().unwrap();

    let record = ingest(
        &UploadedFile::new("daily.xlsx", None, bytes),
        &IngestOptions::default(),
    )
    .unwrap();

    assert_eq!(record.table.rows[0][0], Cell::Text("2024-01-15".into()));
    assert_eq!(record.table.numeric_columns, vec!["Sales".to_string()]);
    assert!(!record.metrics.contains_key("Date"));
    assert_eq!(
        record.text_representation,
        "Date,Sales\n2024-01-15,10\n2024-02-15,20"
    );
}

#[test]
fn test_disjoint_headers_combine() {
    let options = IngestOptions::default();
    let a = ingest(&csv("a.csv", "Alpha,Beta\n1,2\n"), &options).unwrap();
    let b = ingest(&csv("b.csv", "Gamma\n3\n"), &options).unwrap();

    let combined = combine_documents(&[a, b]);
    assert_eq!(
        combined.table.headers,
        vec!["Alpha", "Beta", "Gamma", "Document"]
    );
    assert_eq!(
        combined.table.rows[0],
        vec![
            Cell::Text("1".into()),
            Cell::Text("2".into()),
            Cell::Empty,
            Cell::Text("a.csv".into())
        ]
    );
    assert_eq!(
        combined.table.rows[1],
        vec![
            Cell::Empty,
            Cell::Empty,
            Cell::Text("3".into()),
            Cell::Text("b.csv".into())
        ]
    );
}

#[test]
fn test_region_union_scenario() {
    let options = IngestOptions::default();
    let sales = ingest(&csv("sales.csv", "Region,Sales\nNorth,100\nSouth,80\n"), &options).unwrap();
    let costs = ingest(&csv("costs.csv", "Region,Cost\nNorth,60\n"), &options).unwrap();

    let combined = combine_documents(&[sales, costs]);
    assert_eq!(
        combined.table.headers,
        vec!["Region", "Sales", "Cost", "Document"]
    );
    for row in &combined.table.rows[..2] {
        assert_eq!(row[2], Cell::Empty);
    }
    assert_eq!(combined.table.rows[2][1], Cell::Empty);
    assert!(combined
        .text_representation
        .starts_with("### Document: sales.csv\nRegion,Sales\n"));
    assert!(combined
        .text_representation
        .contains("\n\n### Document: costs.csv\nRegion,Cost\nNorth,60\n\n"));
}

#[test]
fn test_combine_is_byte_identical_across_runs() {
    let options = IngestOptions::default();
    let records = vec![
        ingest(&csv("a.csv", "K,V\nx,1\n"), &options).unwrap(),
        ingest(&csv("b.csv", "K,W\ny,2\n"), &options).unwrap(),
    ];

    let first = serde_json::to_vec(&combine_documents(&records)).unwrap();
    let second = serde_json::to_vec(&combine_documents(&records)).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_batch_from_disk_reports_failures_per_file() {
    let dir = tempfile::tempdir().unwrap();

    let good = dir.path().join("q1.csv");
    std::fs::File::create(&good)
        .unwrap()
        .write_all(b"Month,Units\nJan,3\n")
        .unwrap();

    let wrong_type = dir.path().join("notes.txt");
    std::fs::write(&wrong_type, "hello").unwrap();

    let workbook = dir.path().join("q2.xlsx");
    std::fs::write(&workbook, xlsx_bytes(&[("Apr", 4.0)])).unwrap();

    let missing = dir.path().join("missing.csv");

    let batch = ingest_paths(
        &[good, wrong_type, workbook, missing],
        &IngestOptions::default(),
    )
    .await;

    let names: Vec<&str> = batch.documents.iter().map(|d| d.file_name.as_str()).collect();
    assert_eq!(names, vec!["q1.csv", "q2.xlsx"]);
    assert_eq!(batch.errors.len(), 2);
    assert!(batch.errors.iter().any(|e| e.file_name == "notes.txt"));

    let session = AnalysisSession::from_batch(batch);
    let combined = session.combined.unwrap();
    assert_eq!(
        combined.table.headers,
        vec!["Month", "Units", "Revenue", "Document"]
    );
}

#[tokio::test]
async fn test_oversized_file_on_disk_is_not_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.csv");
    std::fs::write(&path, "A\n".repeat(64)).unwrap();

    let options = IngestOptions {
        max_file_size_bytes: 16,
        ..IngestOptions::default()
    };
    let batch = ingest_paths(&[path], &options).await;
    assert!(batch.documents.is_empty());
    assert!(batch.errors[0].message.contains("exceeds"));
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_short_circuits_sixth_call() {
    let caller = ResilientCaller::new(
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        },
        BreakerConfig::default(),
        CacheConfig::default(),
    );
    let counter = AtomicUsize::new(0);
    let calls = &counter;

    for _ in 0..5 {
        let result: Result<String> = caller
            .call(None, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(overloaded())
            })
            .await;
        assert!(matches!(result, Err(GridlyError::TransientService { .. })));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let sixth: Result<String> = caller
        .call(None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("should not run".to_string())
        })
        .await;
    match sixth {
        Err(GridlyError::CircuitOpen { retry_after }) => {
            assert!(retry_after <= Duration::from_secs(15));
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected circuit open, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(caller.health().circuit_open);

    tokio::time::advance(Duration::from_secs(15)).await;

    let trial: Result<String> = caller
        .call(None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("recovered".to_string())
        })
        .await;
    assert_eq!(trial.unwrap(), "recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    let health = caller.health();
    assert!(health.is_healthy);
    assert!(!health.circuit_open);
    assert_eq!(health.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_keeps_circuit_open() {
    let caller = ResilientCaller::new(
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        },
        BreakerConfig::default(),
        CacheConfig::default(),
    );

    for _ in 0..5 {
        let _: Result<String> = caller.call(None, || async { Err(overloaded()) }).await;
    }
    tokio::time::advance(Duration::from_secs(15)).await;

    let trial: Result<String> = caller.call(None, || async { Err(overloaded()) }).await;
    assert!(trial.is_err());

    let next: Result<String> = caller.call(None, || async { Ok("early".to_string()) }).await;
    assert!(matches!(next, Err(GridlyError::CircuitOpen { .. })));

    caller.reset();
    let after_reset: Result<String> = caller.call(None, || async { Ok("ok".to_string()) }).await;
    assert_eq!(after_reset.unwrap(), "ok");
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_trial_does_not_wedge_breaker() {
    let caller = ResilientCaller::new(
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        },
        BreakerConfig::default(),
        CacheConfig::default(),
    );

    for _ in 0..5 {
        let _: Result<String> = caller.call(None, || async { Err(overloaded()) }).await;
    }
    tokio::time::advance(Duration::from_secs(15)).await;

    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        caller.call(None, std::future::pending::<Result<String>>),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(matches!(
        caller.health().state,
        CircuitState::HalfOpen { .. }
    ));

    tokio::time::advance(Duration::from_secs(60 * 60)).await;

    let next: Result<String> = caller.call(None, || async { Ok("back".to_string()) }).await;
    assert_eq!(next.unwrap(), "back");
    assert_eq!(caller.health().state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_identical_cache_keys_invoke_once() {
    let caller = ResilientCaller::default();
    let counter = AtomicUsize::new(0);
    let calls = &counter;
    let key = cache_key(["summary", "Month,Sales\nJan,100"]);

    for _ in 0..3 {
        let report: Vec<String> = caller
            .call(Some(&key), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec!["Sales rose".to_string()])
            })
            .await
            .unwrap();
        assert_eq!(report, vec!["Sales rose".to_string()]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(10 * 60)).await;
    let _: Vec<String> = caller
        .call(Some(&key), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clones_share_health_state() {
    let caller = ResilientCaller::new(
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        },
        BreakerConfig {
            failure_threshold: 2,
            ..BreakerConfig::default()
        },
        CacheConfig::default(),
    );
    let other = caller.clone();

    let _: Result<u8> = caller.call(None, || async { Err(overloaded()) }).await;
    let _: Result<u8> = other.call(None, || async { Err(overloaded()) }).await;

    assert!(caller.health().circuit_open);
    assert!(caller.cooldown_remaining().is_some());
}
