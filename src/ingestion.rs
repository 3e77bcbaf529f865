use calamine::{open_workbook_auto_from_rs, Data, ExcelDateTime, Reader};
use chrono::{Timelike, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::IngestOptions;
use crate::error::{GridlyError, Result};
use crate::metrics::build_table;
use crate::quality::assess_quality;
use crate::schema::{Cell, DocumentRecord, FileKind, Row};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// An upload held in memory, as received from the caller.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    /// MIME type declared by the uploader, if any.
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type,
            bytes,
        }
    }

    /// Reads a file from disk, refusing to load it when it exceeds `max_size`.
    pub async fn from_path(path: &Path, max_size: u64) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| GridlyError::Parse {
                file: path.display().to_string(),
                message: "Invalid file name".to_string(),
            })?
            .to_string();

        let size = tokio::fs::metadata(path).await?.len();
        if size > max_size {
            return Err(GridlyError::FileTooLarge {
                file: name,
                size,
                limit: max_size,
            });
        }

        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            name,
            mime_type: None,
            bytes,
        })
    }
}

/// Per-file failure reported alongside the successful documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionBatch {
    pub documents: Vec<DocumentRecord>,
    pub errors: Vec<FileError>,
}

impl IngestionBatch {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

/// Resolves the upload format from the declared MIME type, falling back to
/// the file extension when the declaration is missing or generic.
pub fn detect_kind(file_name: &str, declared_mime: Option<&str>) -> Option<FileKind> {
    let by_extension = || {
        mime_guess::from_path(file_name)
            .iter()
            .find_map(|mime| FileKind::from_mime(mime.essence_str()))
    };

    match declared_mime.and_then(FileKind::from_mime) {
        // Windows browsers label .csv uploads as Excel.
        Some(FileKind::Xls) if by_extension() == Some(FileKind::Csv) => return Some(FileKind::Csv),
        Some(kind) => return Some(kind),
        None => {}
    }

    let declared_is_generic = declared_mime
        .map(|m| m.trim().is_empty() || m.starts_with("application/octet-stream"))
        .unwrap_or(true);
    if !declared_is_generic {
        return None;
    }

    by_extension()
}

/// Ingests one upload into a [`DocumentRecord`].
pub fn ingest(file: &UploadedFile, options: &IngestOptions) -> Result<DocumentRecord> {
    let kind = detect_kind(&file.name, file.mime_type.as_deref()).ok_or_else(|| {
        GridlyError::UnsupportedFileType {
            file: file.name.clone(),
            mime_type: file
                .mime_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        }
    })?;

    let size = file.bytes.len() as u64;
    if size > options.max_file_size_bytes {
        return Err(GridlyError::FileTooLarge {
            file: file.name.clone(),
            size,
            limit: options.max_file_size_bytes,
        });
    }

    let grid = match kind {
        FileKind::Csv => decode_csv(&file.name, &file.bytes)?,
        FileKind::Xlsx | FileKind::Xls => decode_workbook(&file.name, &file.bytes)?,
    };

    let mut grid = grid.into_iter();
    let headers: Vec<String> = grid
        .next()
        .ok_or_else(|| GridlyError::EmptyFile(file.name.clone()))?
        .iter()
        .map(|cell| cell.to_string())
        .collect();

    let data_rows: Vec<Row> = grid.collect();
    let source_row_count = data_rows.len();
    if source_row_count > options.max_rows {
        warn!(
            "'{}' has {} rows; keeping the first {}",
            file.name, source_row_count, options.max_rows
        );
    }
    let rows: Vec<Row> = data_rows.into_iter().take(options.max_rows).collect();

    let (table, metrics) = build_table(headers, rows);
    let text_representation = table.to_csv_text(options.sample_rows_for_text)?;
    let quality_issues = assess_quality(&table);

    info!(
        "Ingested '{}': {} rows, {} columns ({} numeric)",
        file.name,
        table.row_count(),
        table.headers.len(),
        table.numeric_columns.len()
    );
    if !quality_issues.is_empty() {
        debug!("'{}' has {} quality issues", file.name, quality_issues.len());
    }

    Ok(DocumentRecord {
        id: Uuid::new_v4().to_string(),
        file_name: file.name.clone(),
        kind,
        table,
        text_representation,
        metrics,
        quality_issues,
        source_row_count,
        ingested_at: Utc::now(),
    })
}

/// Decodes CSV bytes into raw rows, header row included. Ragged rows are
/// kept as-is and invalid UTF-8 is replaced.
pub fn decode_csv(file_name: &str, bytes: &[u8]) -> Result<Vec<Row>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (index, record) in reader.byte_records().enumerate() {
        let record = record.map_err(|e| GridlyError::Parse {
            file: file_name.to_string(),
            message: format!("line {}: {}", index + 1, e),
        })?;
        rows.push(
            record
                .iter()
                .map(|field| Cell::from_text(String::from_utf8_lossy(field)))
                .collect(),
        );
    }

    Ok(rows)
}

/// Decodes the first sheet of an XLSX/XLS workbook into raw rows.
pub fn decode_workbook(file_name: &str, bytes: &[u8]) -> Result<Vec<Row>> {
    let parse_error = |message: String| GridlyError::Parse {
        file: file_name.to_string(),
        message,
    };

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| parse_error(format!("Failed to open workbook: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| parse_error("Workbook has no worksheets".to_string()))?
        .map_err(|e| parse_error(format!("Failed to read first sheet: {}", e)))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect())
}

fn workbook_cell(data: &Data) -> Cell {
    match data {
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) => Cell::from_text(s.clone()),
        Data::DateTime(value) => Cell::Text(excel_date_text(value)),
        Data::DateTimeIso(text) | Data::DurationIso(text) => Cell::from_text(text.clone()),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::Empty | Data::Error(_) => Cell::Empty,
    }
}

/// Dates and durations stay text so they never count as numeric columns.
fn excel_date_text(value: &ExcelDateTime) -> String {
    if value.is_duration() {
        if let Some(duration) = value.as_duration() {
            let seconds = duration.num_seconds();
            return format!(
                "{:02}:{:02}:{:02}",
                seconds / 3600,
                (seconds % 3600) / 60,
                seconds % 60
            );
        }
    } else if let Some(datetime) = value.as_datetime() {
        let midnight = datetime.hour() == 0 && datetime.minute() == 0 && datetime.second() == 0;
        let pattern = if midnight { "%Y-%m-%d" } else { "%Y-%m-%dT%H:%M:%S" };
        return datetime.format(pattern).to_string();
    }
    format!("serial {}", value.as_f64())
}

/// Ingests every upload concurrently. Failures are collected per file and
/// never abort the rest of the batch. Files beyond `max_files` are rejected.
pub async fn ingest_batch(files: Vec<UploadedFile>, options: &IngestOptions) -> IngestionBatch {
    let mut rejected = Vec::new();
    let mut accepted = Vec::new();
    for (index, file) in files.into_iter().enumerate() {
        if index < options.max_files {
            accepted.push(file);
        } else {
            rejected.push(GridlyError::TooManyFiles {
                file: file.name,
                limit: options.max_files,
            });
        }
    }

    let tasks = accepted.into_iter().map(|file| {
        let options = options.clone();
        async move {
            let name = file.name.clone();
            let outcome = tokio::task::spawn_blocking(move || ingest(&file, &options))
                .await
                .unwrap_or_else(|e| {
                    Err(GridlyError::Parse {
                        file: name.clone(),
                        message: format!("ingestion task failed: {}", e),
                    })
                });
            (name, outcome)
        }
    });

    let mut batch = IngestionBatch::default();
    for (name, outcome) in join_all(tasks).await {
        match outcome {
            Ok(document) => batch.documents.push(document),
            Err(e) => {
                warn!("Failed to ingest '{}': {}", name, e);
                batch.errors.push(FileError {
                    file_name: name,
                    message: e.to_string(),
                });
            }
        }
    }

    for error in rejected {
        let file_name = match &error {
            GridlyError::TooManyFiles { file, .. } => file.clone(),
            _ => String::new(),
        };
        warn!("{}", error);
        batch.errors.push(FileError {
            file_name,
            message: error.to_string(),
        });
    }

    info!(
        "Ingestion finished: {} documents, {} errors",
        batch.documents.len(),
        batch.errors.len()
    );
    batch
}

/// Reads and ingests files from disk. Read failures are reported per file.
pub async fn ingest_paths(paths: &[PathBuf], options: &IngestOptions) -> IngestionBatch {
    let reads = paths
        .iter()
        .map(|path| UploadedFile::from_path(path, options.max_file_size_bytes));
    let loaded = join_all(reads).await;

    let mut files = Vec::new();
    let mut read_errors = Vec::new();
    for (path, outcome) in paths.iter().zip(loaded) {
        match outcome {
            Ok(file) => files.push(file),
            Err(e) => read_errors.push(FileError {
                file_name: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    let mut batch = ingest_batch(files, options).await;
    batch.errors.extend(read_errors);
    batch
}
