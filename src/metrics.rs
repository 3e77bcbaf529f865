use log::debug;

use crate::schema::{Cell, ColumnMetrics, MetricsMap, ParsedTable, Row, Trend};

/// A column is numeric iff it has at least one non-empty cell and every
/// non-empty cell is a number or normalizes to one.
pub fn is_numeric_column<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> bool {
    let mut seen = false;
    for cell in cells {
        if cell.is_empty() {
            continue;
        }
        if cell.as_number().is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

/// Trend from the first and last values only.
pub fn trend_of(first: f64, last: f64) -> Trend {
    if last > first {
        Trend::Increase
    } else if last < first {
        Trend::Decrease
    } else {
        Trend::Stable
    }
}

/// Aggregates the numeric cells of a column. Cells that fail to normalize
/// are left out. Returns `None` when nothing numeric remains.
pub fn column_metrics<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Option<ColumnMetrics> {
    let values: Vec<f64> = cells.into_iter().filter_map(Cell::as_number).collect();
    let first = *values.first()?;
    let last = *values.last()?;

    let total: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(ColumnMetrics {
        total,
        average: total / values.len() as f64,
        min,
        max,
        trend: trend_of(first, last),
    })
}

/// Builds a table from headers and rows, classifying numeric columns and
/// computing their metrics in one pass.
///
/// When a header name repeats, the first occurrence that classifies as
/// numeric owns the name's metrics.
pub fn build_table(headers: Vec<String>, rows: Vec<Row>) -> (ParsedTable, MetricsMap) {
    let mut table = ParsedTable {
        headers,
        rows,
        numeric_columns: Vec::new(),
    };
    let mut numeric_columns: Vec<String> = Vec::new();
    let mut metrics = MetricsMap::new();

    for (index, header) in table.headers.iter().enumerate() {
        if numeric_columns.contains(header) {
            continue;
        }
        if !is_numeric_column(table.column_values(index)) {
            continue;
        }
        if let Some(column) = column_metrics(table.column_values(index)) {
            debug!(
                "Column '{}' is numeric: total={} trend={}",
                header, column.total, column.trend
            );
            metrics.insert(header.clone(), column);
        }
        numeric_columns.push(header.clone());
    }

    table.numeric_columns = numeric_columns;
    (table, metrics)
}
