use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::normalize::normalize_numeric;

/// Header of the synthetic provenance column appended by the combiner.
pub const DOCUMENT_COLUMN: &str = "Document";

/// A single spreadsheet cell.
///
/// Serializes untagged: numbers as JSON numbers, text as strings and empty
/// cells as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    #[default]
    Empty,
}

impl Cell {
    /// Builds a cell from raw text, mapping blank input to [`Cell::Empty`].
    pub fn from_text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(raw)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Numeric value of the cell. Text goes through the normalizer.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Number(_) => None,
            Cell::Text(s) => normalize_numeric(s),
            Cell::Empty => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => f.write_str(s),
            Cell::Empty => Ok(()),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::from_text(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::from_text(value)
    }
}

pub type Row = Vec<Cell>;

/// Header row plus data rows of one sheet.
///
/// Rows are positionally aligned to `headers` but are not required to be
/// rectangular; ragged rows are surfaced by the quality report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    /// Headers classified numeric, in header order.
    pub numeric_columns: Vec<String>,
}

impl ParsedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of the first column carrying `header`.
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Cells of column `index`; rows too short to reach it are skipped.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    pub fn is_numeric(&self, header: &str) -> bool {
        self.numeric_columns.iter().any(|h| h == header)
    }

    /// Renders the header row and the first `sample_rows` data rows as
    /// comma-separated text, quoting fields only where required.
    pub fn to_csv_text(&self, sample_rows: usize) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(&self.headers)?;
        for row in self.rows.iter().take(sample_rows) {
            writer.write_record(row.iter().map(|cell| cell.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_end_matches('\n').to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increase,
    Decrease,
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Trend::Increase => "increase",
            Trend::Decrease => "decrease",
            Trend::Stable => "stable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetrics {
    pub total: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Sign of last minus first value; intermediate values are ignored.
    pub trend: Trend,
}

pub type MetricsMap = BTreeMap<String, ColumnMetrics>;

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xlsx,
    Xls,
}

impl FileKind {
    pub const CSV_MIME: &'static str = "text/csv";
    pub const XLSX_MIME: &'static str =
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    pub const XLS_MIME: &'static str = "application/vnd.ms-excel";

    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            Self::CSV_MIME | "application/csv" => Some(FileKind::Csv),
            Self::XLSX_MIME => Some(FileKind::Xlsx),
            Self::XLS_MIME => Some(FileKind::Xls),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileKind::Csv => Self::CSV_MIME,
            FileKind::Xlsx => Self::XLSX_MIME,
            FileKind::Xls => Self::XLS_MIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssueKind {
    RaggedRow,
    BlankRow,
    DuplicateHeader,
    BlankHeader,
    /// A source header collides with the provenance column name.
    ReservedHeader,
    EmptyColumn,
    MixedTypes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityIssue {
    pub kind: QualityIssueKind,
    /// Header the issue applies to, if column-scoped.
    pub column: Option<String>,
    /// Zero-based data row index, if row-scoped.
    pub row: Option<usize>,
    pub description: String,
}

/// One ingested upload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub file_name: String,
    pub kind: FileKind,
    pub table: ParsedTable,
    pub text_representation: String,
    pub metrics: MetricsMap,
    pub quality_issues: Vec<QualityIssue>,
    /// Data rows in the source before the row cap was applied.
    pub source_row_count: usize,
    pub ingested_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn was_truncated(&self) -> bool {
        self.source_row_count > self.table.row_count()
    }
}

/// Union of several documents with a provenance column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDataset {
    pub table: ParsedTable,
    pub text_representation: String,
    pub metrics: MetricsMap,
}

// ---------------------------------------------------------------------------
// Structured responses from the analysis service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDescription {
    #[schemars(description = "Column header exactly as it appears in the data")]
    pub column: String,
    #[schemars(description = "What the column represents, in one sentence")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RowFinding {
    #[schemars(description = "Short label identifying the row, e.g. the value of its first column")]
    pub row_label: String,
    #[schemars(description = "Notable observation about this row")]
    pub finding: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisReport {
    #[schemars(description = "Key insights about the dataset, most important first")]
    pub insights: Vec<String>,
    #[schemars(description = "One description per column")]
    pub column_descriptions: Vec<ColumnDescription>,
    #[schemars(description = "Rows that stand out (outliers, peaks, anomalies)")]
    pub row_findings: Vec<RowFinding>,
    #[schemars(description = "Data quality problems spotted in the sample")]
    pub quality_issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ForecastPoint {
    #[schemars(description = "Period label, e.g. 'Mar' or '2025-Q2'")]
    pub period: String,
    #[schemars(description = "Column being forecast")]
    pub column: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Forecast {
    pub predictions: Vec<ForecastPoint>,
    pub confidence: ConfidenceLevel,
    #[schemars(description = "Assumptions the forecast relies on")]
    pub assumptions: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatAnswer {
    #[schemars(description = "Markdown answer to the user's question")]
    pub answer: String,
    #[schemars(description = "Documents or columns the answer draws on")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}
