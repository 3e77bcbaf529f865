//! # Gridly
//!
//! Spreadsheet ingestion and analysis plumbing: uploads (CSV, XLSX, XLS) are
//! parsed into tables with per-column statistics, optionally merged across
//! files, and handed to a hosted language model through a retrying,
//! circuit-breaking, caching call wrapper.
//!
//! ## Core Concepts
//!
//! - **Document**: one ingested upload with its table, metrics and the
//!   row-sampled text sent for analysis
//! - **Combined dataset**: the union of several documents' columns with a
//!   trailing `Document` provenance column
//! - **Resilient caller**: shared retry/backoff, circuit breaker and result
//!   cache protecting the analysis backend
//!
//! ## Example
//!
//! ```rust,ignore
//! use gridly::*;
//!
//! let config = GridlyConfig::default();
//! let files = vec![
//!     UploadedFile::new("sales.csv", Some("text/csv".into()), b"Region,Sales\nNorth,10\n".to_vec()),
//!     UploadedFile::new("costs.csv", Some("text/csv".into()), b"Region,Cost\nNorth,4\n".to_vec()),
//! ];
//!
//! let session = AnalysisSession::ingest(files, &config.ingest).await;
//! let combined = session.combined.as_ref().unwrap();
//! assert_eq!(combined.table.headers, vec!["Region", "Sales", "Cost", "Document"]);
//! ```

pub mod combine;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod normalize;
pub mod quality;
pub mod resilience;
pub mod schema;

#[cfg(feature = "gemini")]
pub mod llm;

pub use combine::{combine_documents, combine_if_multiple, union_headers};
pub use config::*;
pub use error::{GridlyError, Result};
pub use ingestion::*;
pub use metrics::{build_table, column_metrics, is_numeric_column, trend_of};
pub use normalize::normalize_numeric;
pub use quality::assess_quality;
pub use resilience::{cache_key, CircuitState, ResilientCaller, ServiceHealth};
pub use schema::*;

use log::info;
use serde::{Deserialize, Serialize};

/// Everything the presentation layer needs after an upload: the ingested
/// documents, their union when there is more than one, and per-file errors.
///
/// Analysis failures never touch this value, so a failed call can be retried
/// without re-uploading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub documents: Vec<DocumentRecord>,
    pub combined: Option<CombinedDataset>,
    pub errors: Vec<FileError>,
}

impl AnalysisSession {
    pub async fn ingest(files: Vec<UploadedFile>, options: &IngestOptions) -> Self {
        let batch = ingest_batch(files, options).await;
        Self::from_batch(batch)
    }

    pub fn from_batch(batch: IngestionBatch) -> Self {
        let combined = combine_if_multiple(&batch.documents);
        info!(
            "Session ready: {} documents{}",
            batch.documents.len(),
            if combined.is_some() { ", combined" } else { "" }
        );
        Self {
            documents: batch.documents,
            combined,
            errors: batch.errors,
        }
    }

    /// Adds more documents and recomputes the union.
    pub fn extend(&mut self, batch: IngestionBatch) {
        self.documents.extend(batch.documents);
        self.errors.extend(batch.errors);
        self.combined = combine_if_multiple(&self.documents);
    }

    /// Removes a document by id and recomputes the union.
    pub fn remove_document(&mut self, id: &str) -> Option<DocumentRecord> {
        let index = self.documents.iter().position(|d| d.id == id)?;
        let removed = self.documents.remove(index);
        self.combined = combine_if_multiple(&self.documents);
        Some(removed)
    }

    /// Text to send for analysis: the combined text when several documents
    /// are loaded, otherwise the single document's text.
    pub fn analysis_text(&self) -> Option<&str> {
        match (&self.combined, self.documents.as_slice()) {
            (Some(combined), _) => Some(combined.text_representation.as_str()),
            (None, [only]) => Some(only.text_representation.as_str()),
            _ => None,
        }
    }
}
