use std::collections::HashSet;

use crate::schema::{ParsedTable, QualityIssue, QualityIssueKind, DOCUMENT_COLUMN};

/// Reports structural problems in a table without altering it.
pub fn assess_quality(table: &ParsedTable) -> Vec<QualityIssue> {
    let mut issues = Vec::new();
    let width = table.headers.len();

    let mut seen = HashSet::new();
    for (index, header) in table.headers.iter().enumerate() {
        if header.trim().is_empty() {
            issues.push(QualityIssue {
                kind: QualityIssueKind::BlankHeader,
                column: None,
                row: None,
                description: format!("Column {} has no header", index + 1),
            });
        } else if header == DOCUMENT_COLUMN {
            issues.push(QualityIssue {
                kind: QualityIssueKind::ReservedHeader,
                column: Some(header.clone()),
                row: None,
                description: format!(
                    "Header '{}' clashes with the provenance column added when files are combined",
                    header
                ),
            });
        }
        if !header.trim().is_empty() && !seen.insert(header.as_str()) {
            issues.push(QualityIssue {
                kind: QualityIssueKind::DuplicateHeader,
                column: Some(header.clone()),
                row: None,
                description: format!("Header '{}' appears more than once", header),
            });
        }
    }

    for (index, row) in table.rows.iter().enumerate() {
        if row.iter().all(|cell| cell.is_empty()) {
            issues.push(QualityIssue {
                kind: QualityIssueKind::BlankRow,
                column: None,
                row: Some(index),
                description: format!("Row {} is blank", index + 1),
            });
        }
        if row.len() != width {
            issues.push(QualityIssue {
                kind: QualityIssueKind::RaggedRow,
                column: None,
                row: Some(index),
                description: format!(
                    "Row {} has {} cells but the header has {}",
                    index + 1,
                    row.len(),
                    width
                ),
            });
        }
    }

    if table.rows.is_empty() {
        return issues;
    }

    for (index, header) in table.headers.iter().enumerate() {
        let mut numeric = 0usize;
        let mut textual = 0usize;
        for cell in table.column_values(index).filter(|c| !c.is_empty()) {
            if cell.as_number().is_some() {
                numeric += 1;
            } else {
                textual += 1;
            }
        }

        if numeric + textual == 0 {
            issues.push(QualityIssue {
                kind: QualityIssueKind::EmptyColumn,
                column: Some(header.clone()),
                row: None,
                description: format!("Column '{}' has no values", header),
            });
        } else if numeric > 0 && textual > 0 {
            issues.push(QualityIssue {
                kind: QualityIssueKind::MixedTypes,
                column: Some(header.clone()),
                row: None,
                description: format!(
                    "Column '{}' mixes {} numeric and {} text values",
                    header, numeric, textual
                ),
            });
        }
    }

    issues
}
