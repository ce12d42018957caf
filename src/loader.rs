// src/loader.rs
//! Bulk loader: flattened records → positional batch → warehouse. Also the
//! per-artifact parsing of contact batches and transcripts.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::artifacts::{ArtifactKey, ArtifactStore};
use crate::error::SyncError;
use crate::model::{row_from_record, Row, Scalar};
use crate::store::{LoadBatch, Table, Warehouse};
use crate::transform::Transformer;

/// Field separator of the bulk-load format; never allowed inside transcript values.
pub const LOAD_DELIMITER: char = '|';

impl Table {
    /// Tables whose free-text values must be stripped of the load delimiter.
    pub fn sanitized(&self) -> bool {
        matches!(self, Table::Transcripts | Table::EnhancedTranscripts)
    }
}

/// Columns come from the first row; every other row must have exactly the same set.
/// `Ok(None)` for an empty input.
pub fn build_batch(table: Table, rows: &[Row]) -> Result<Option<LoadBatch>, SyncError> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };
    let columns: Vec<String> = first.keys().cloned().collect();
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(c)) {
            return Err(SyncError::HeterogeneousBatch {
                table: table.to_string(),
                row: i,
                expected: columns,
                found: row.keys().cloned().collect(),
            });
        }
        out.push(columns.iter().map(|c| row[c].clone()).collect());
    }
    Ok(Some(LoadBatch {
        table,
        columns,
        rows: out,
    }))
}

/// Remove the load delimiter from every text cell, in place.
pub fn sanitize(batch: &mut LoadBatch) {
    for row in batch.rows.iter_mut() {
        for cell in row.iter_mut() {
            if let Scalar::Text(s) = cell {
                if s.contains(LOAD_DELIMITER) {
                    s.retain(|c| c != LOAD_DELIMITER);
                }
            }
        }
    }
}

/// Build, sanitize where the table requires it, and load. Empty input is a no-op.
pub fn load_rows(warehouse: &dyn Warehouse, table: Table, rows: &[Row]) -> Result<usize> {
    let Some(mut batch) = build_batch(table, rows)? else {
        return Ok(0);
    };
    if table.sanitized() {
        sanitize(&mut batch);
    }
    let n = warehouse
        .load(&batch)
        .with_context(|| format!("loading {} rows into {table}", batch.len()))?;
    metrics::counter!("sync_rows_loaded_total", "table" => table.as_str()).increment(n as u64);
    Ok(n)
}

/// Parse one contacts artifact and load its rows into `contacts`.
///
/// Each contact goes through the `contacts` pipeline; `interaction_type`,
/// `transcript_downloaded = false` and `load_file` are added afterwards.
pub fn load_contacts_file(
    store: &ArtifactStore,
    warehouse: &dyn Warehouse,
    transformer: &Transformer,
    file_name: &str,
) -> Result<usize> {
    info!(target: "sync", file = %file_name, "parsing contacts file");
    let interaction_type = match store.index().get(file_name).map(|e| &e.key) {
        Some(ArtifactKey::Contacts { interaction_type, .. }) => *interaction_type,
        _ => match ArtifactKey::parse(file_name)? {
            Some(ArtifactKey::Contacts { interaction_type, .. }) => interaction_type,
            _ => {
                return Err(SyncError::MalformedArtifactName {
                    file_name: file_name.to_string(),
                }
                .into())
            }
        },
    };

    let contacts = match store.read(file_name)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    if contacts.is_empty() {
        warn!(target: "sync", file = %file_name, "empty contacts file");
        return Ok(0);
    }

    let mut rows = Vec::with_capacity(contacts.len());
    for contact in contacts {
        let out = transformer
            .run_transforms(contact)
            .with_context(|| format!("transforming contact in {file_name}"))?;
        let Value::Object(record) = out else {
            anyhow::bail!("contacts pipeline must produce objects ({file_name})");
        };
        let mut row = row_from_record(&record);
        row.insert("interaction_type".into(), Scalar::Text(interaction_type.to_string()));
        row.insert("transcript_downloaded".into(), Scalar::Bool(false));
        row.insert("load_file".into(), Scalar::Text(file_name.to_string()));
        rows.push(row);
    }
    load_rows(warehouse, Table::Contacts, &rows)
}

/// Parse one transcript artifact and load its messages into `transcripts`.
///
/// The `recording` pipeline must leave an array of flat message objects under
/// `messages`.
pub fn load_transcript_file(
    store: &ArtifactStore,
    warehouse: &dyn Warehouse,
    transformer: &Transformer,
    file_name: &str,
) -> Result<usize> {
    info!(target: "sync", file = %file_name, "parsing transcript file");
    let transcript = store.read(file_name)?;
    let out = transformer
        .run_transforms(transcript)
        .with_context(|| format!("transforming transcript {file_name}"))?;
    let messages = match out.get("messages") {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(SyncError::MissingMessages {
                file_name: file_name.to_string(),
            }
            .into())
        }
    };
    if messages.is_empty() {
        warn!(target: "sync", file = %file_name, "transcript has no messages");
        return Ok(0);
    }
    let rows = messages
        .iter()
        .map(|m| match m {
            Value::Object(record) => Ok(row_from_record(record)),
            _ => Err(anyhow::anyhow!("message in {file_name} is not an object")),
        })
        .collect::<Result<Vec<_>>>()?;
    load_rows(warehouse, Table::Transcripts, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Scalar)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_input_is_nothing_to_do() {
        assert!(build_batch(Table::Contacts, &[]).unwrap().is_none());
    }

    #[test]
    fn positional_rows_follow_first_row_columns() {
        let rows = vec![
            row(&[("b", Scalar::Int(1)), ("a", Scalar::Text("x".into()))]),
            row(&[("a", Scalar::Absent), ("b", Scalar::Int(2))]),
        ];
        let batch = build_batch(Table::Transcripts, &rows).unwrap().unwrap();
        assert_eq!(batch.columns, vec!["a", "b"]);
        assert_eq!(batch.rows[1], vec![Scalar::Absent, Scalar::Int(2)]);
    }

    #[test]
    fn heterogeneous_rows_are_rejected() {
        let rows = vec![
            row(&[("a", Scalar::Int(1))]),
            row(&[("a", Scalar::Int(2)), ("extra", Scalar::Int(3))]),
        ];
        let err = build_batch(Table::Contacts, &rows).unwrap_err();
        match err {
            SyncError::HeterogeneousBatch { row, found, .. } => {
                assert_eq!(row, 1);
                assert_eq!(found, vec!["a", "extra"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sanitize_strips_delimiter_only_from_text() {
        let rows = vec![row(&[
            ("n", Scalar::Int(1)),
            ("text", Scalar::Text("a|b||c".into())),
        ])];
        let mut batch = build_batch(Table::Transcripts, &rows).unwrap().unwrap();
        sanitize(&mut batch);
        assert_eq!(batch.rows[0], vec![Scalar::Int(1), Scalar::Text("abc".into())]);
        assert!(!Table::Contacts.sanitized());
    }
}
