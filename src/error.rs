use std::time::Duration;
use thiserror::Error;

/// Substrings that mark an outbound failure as transient. Matched
/// case-insensitively against the rendered error message.
const RETRYABLE_MARKERS: &[&str] = &[
    "overload",
    "service unavailable",
    "unavailable",
    "rate limit",
    "rate-limit",
    "resource_exhausted",
    "too many requests",
    "timeout",
    "timed out",
    "429",
    "502",
    "503",
    "504",
];

#[derive(Error, Debug)]
pub enum GridlyError {
    #[error("Unsupported file type for '{file}': {mime_type}. Only CSV, XLSX and XLS are accepted")]
    UnsupportedFileType { file: String, mime_type: String },

    #[error("File '{file}' is {size} bytes, which exceeds the {limit} byte limit")]
    FileTooLarge { file: String, size: u64, limit: u64 },

    #[error("File '{file}' was skipped: at most {limit} files can be analyzed at once")]
    TooManyFiles { file: String, limit: usize },

    #[error("File '{0}' contains no rows")]
    EmptyFile(String),

    #[error("Failed to parse '{file}': {message}")]
    Parse { file: String, message: String },

    #[error(
        "The analysis service is temporarily unavailable after {consecutive_failures} consecutive failures. Please try again shortly. ({message})"
    )]
    TransientService {
        consecutive_failures: u32,
        message: String,
    },

    #[error("The analysis service is cooling down after repeated failures. Retry in {}s", .retry_after.as_secs().max(1))]
    CircuitOpen { retry_after: Duration },

    #[error("Analysis request failed: {0}")]
    PermanentService(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "gemini")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GridlyError {
    /// Whether an outbound call that failed with this error is worth retrying.
    ///
    /// Wrapper-produced errors (`CircuitOpen`, `TransientService`,
    /// `PermanentService`) are terminal and never retried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            GridlyError::CircuitOpen { .. }
            | GridlyError::TransientService { .. }
            | GridlyError::PermanentService(_) => false,
            #[cfg(feature = "gemini")]
            GridlyError::Http(e) if e.is_timeout() => true,
            other => message_is_retryable(&other.to_string()),
        }
    }
}

pub(crate) fn message_is_retryable(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RETRYABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

pub type Result<T> = std::result::Result<T, GridlyError>;
