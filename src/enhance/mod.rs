// src/enhance/mod.rs
//! Enhancement: one derived summary row per transcribed contact.
//!
//! Per contact, strictly in order: load its transcript rows → `transcripts`
//! frame pipeline → `transcript_summary` fold → nulls become `Absent` →
//! load one row into `enhanced_transcripts`. Contacts are independent and run
//! on a bounded `WorkerPool`; completion order across contacts is unspecified.

pub mod pool;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::SyncError;
use crate::loader::load_rows;
use crate::model::{row_from_record, ContactId, Row, Scalar};
use crate::store::{Table, Warehouse};
use crate::transform::Transformer;

pub use pool::{UnitError, UnitOutcome, WorkerPool};

/// Best-effort result: every pending contact is attempted.
#[derive(Debug, Default)]
pub struct EnhancementReport {
    pub succeeded: Vec<ContactId>,
    pub failed: Vec<(ContactId, UnitError)>,
}

impl EnhancementReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<ContactId> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }

    /// `Err(EnhancementFailed)` when any unit failed.
    pub fn into_result(self) -> Result<Self, SyncError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(SyncError::EnhancementFailed {
                failed: self.failed_ids(),
            })
        }
    }
}

pub struct Enhancer {
    warehouse: Arc<dyn Warehouse>,
    transcripts: Arc<Transformer>,
    summary: Arc<Transformer>,
    pool: WorkerPool,
}

impl Enhancer {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        transcripts: Transformer,
        summary: Transformer,
        pool: WorkerPool,
    ) -> Self {
        Self {
            warehouse,
            transcripts: Arc::new(transcripts),
            summary: Arc::new(summary),
            pool,
        }
    }

    pub async fn run(&self) -> Result<EnhancementReport> {
        let pending = self
            .warehouse
            .unenhanced_contacts()
            .context("listing contacts to enhance")?;
        if pending.is_empty() {
            info!(target: "sync", "no transcripts to enhance");
            return Ok(EnhancementReport::default());
        }
        info!(target: "sync", n = pending.len(), workers = self.pool.width(), "enhancing transcripts");

        let warehouse = Arc::clone(&self.warehouse);
        let transcripts = Arc::clone(&self.transcripts);
        let summary = Arc::clone(&self.summary);
        let outcomes = self
            .pool
            .run(pending, move |contact_id| {
                enhance_one(warehouse.as_ref(), &transcripts, &summary, contact_id)
            })
            .await;

        let mut report = EnhancementReport::default();
        for UnitOutcome { key, result } in outcomes {
            metrics::counter!("sync_enhance_units_total").increment(1);
            match result {
                Ok(_) => report.succeeded.push(key),
                Err(e) => {
                    metrics::counter!("sync_enhance_failures_total").increment(1);
                    warn!(target: "sync", contact_id = key, error = %e, "enhancement failed");
                    report.failed.push((key, e));
                }
            }
        }
        report.succeeded.sort_unstable();
        report.failed.sort_by_key(|(id, _)| *id);
        info!(
            target: "sync",
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "enhancement finished"
        );
        Ok(report)
    }
}

/// The full chain for one contact. Returns the row that was loaded.
pub fn enhance_one(
    warehouse: &dyn Warehouse,
    transcripts: &Transformer,
    summary: &Transformer,
    contact_id: ContactId,
) -> Result<Row> {
    let frame = warehouse.transcript_frame(contact_id)?;
    let frame = transcripts
        .run_df_transforms(frame)
        .with_context(|| format!("transcripts pipeline for contact {contact_id}"))?;
    let record = summary
        .run_meta_df_transforms(frame)
        .with_context(|| format!("summary pipeline for contact {contact_id}"))?;
    let mut row = row_from_record(&record);
    row.insert("contact_id".to_string(), Scalar::Int(contact_id));
    load_rows(warehouse, Table::EnhancedTranscripts, std::slice::from_ref(&row))?;
    Ok(row)
}
