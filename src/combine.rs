use log::{debug, warn};
use std::collections::HashMap;

use crate::metrics::build_table;
use crate::schema::{Cell, CombinedDataset, DocumentRecord, Row, DOCUMENT_COLUMN};

/// Distinct headers across all documents, in order of first appearance.
pub fn union_headers(records: &[DocumentRecord]) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for record in records {
        for header in &record.table.headers {
            if !headers.contains(header) {
                headers.push(header.clone());
            }
        }
    }
    headers
}

/// Merges documents into one table over the union of their headers plus a
/// trailing provenance column. Pure: the same input always yields the same
/// output.
pub fn combine_documents(records: &[DocumentRecord]) -> CombinedDataset {
    let union = union_headers(records);
    let positions: HashMap<&str, usize> = union
        .iter()
        .enumerate()
        .map(|(index, header)| (header.as_str(), index))
        .collect();
    let document_index = union.len();
    let width = document_index + 1;

    let mut rows: Vec<Row> = Vec::new();
    for record in records {
        if record.table.column_index(DOCUMENT_COLUMN).is_some() {
            warn!(
                "'{}' already has a '{}' column; provenance is the last column",
                record.file_name, DOCUMENT_COLUMN
            );
        }

        // Source column index -> union column index. A repeated header
        // resolves to its first occurrence in the source.
        let mapping: Vec<(usize, usize)> = record
            .table
            .headers
            .iter()
            .enumerate()
            .filter(|(index, header)| record.table.column_index(header) == Some(*index))
            .filter_map(|(index, header)| positions.get(header.as_str()).map(|t| (index, *t)))
            .collect();

        for source_row in &record.table.rows {
            let mut row: Row = vec![Cell::Empty; width];
            for (source, target) in &mapping {
                if let Some(cell) = source_row.get(*source) {
                    row[*target] = cell.clone();
                }
            }
            row[document_index] = Cell::Text(record.file_name.clone());
            rows.push(row);
        }
    }

    let mut headers = union;
    headers.push(DOCUMENT_COLUMN.to_string());

    let (table, metrics) = build_table(headers, rows);

    let text_representation: String = records
        .iter()
        .map(|record| {
            format!(
                "### Document: {}\n{}\n\n",
                record.file_name, record.text_representation
            )
        })
        .collect();

    debug!(
        "Combined {} documents into {} rows across {} columns",
        records.len(),
        table.row_count(),
        table.headers.len()
    );

    CombinedDataset {
        table,
        text_representation,
        metrics,
    }
}

/// Combines only when there is more than one document.
pub fn combine_if_multiple(records: &[DocumentRecord]) -> Option<CombinedDataset> {
    (records.len() > 1).then(|| combine_documents(records))
}
