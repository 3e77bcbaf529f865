use gridly::*;
use std::error::Error;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    env_logger::init();

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        return Err("usage: combine_files <file.csv|xlsx|xls>...".into());
    }

    let config = GridlyConfig::default().with_env_overrides()?;
    let batch = ingest_paths(&paths, &config.ingest).await;
    let session = AnalysisSession::from_batch(batch);

    for error in &session.errors {
        println!("❌ {}", error.message);
    }

    for document in &session.documents {
        println!(
            "📄 {} ({} rows, {} columns)",
            document.file_name,
            document.table.row_count(),
            document.table.headers.len()
        );
        for (column, metrics) in &document.metrics {
            println!(
                "   {:<20} total={:>12.2} avg={:>10.2} min={:>10.2} max={:>10.2} trend={}",
                column, metrics.total, metrics.average, metrics.min, metrics.max, metrics.trend
            );
        }
        for issue in &document.quality_issues {
            println!("   ⚠️  {}", issue.description);
        }
    }

    if let Some(combined) = &session.combined {
        println!(
            "\n🔗 Combined: {} rows over {}",
            combined.table.row_count(),
            combined.table.headers.join(", ")
        );
    }

    if let Some(text) = session.analysis_text() {
        println!("\n--- Text sent for analysis ---\n{}", text);
    }

    Ok(())
}
