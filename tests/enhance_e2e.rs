// tests/enhance_e2e.rs
mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use interaction_sync::loader::load_transcript_file;
use interaction_sync::store::LoadBatch;
use interaction_sync::transform::Frame;
use interaction_sync::{
    ArtifactKey, ArtifactStore, ContactId, Enhancer, SqliteWarehouse, Table, UnitError, Warehouse,
    WorkerPool,
};
use serde_json::Value;

fn loaded_warehouse(dir: &std::path::Path) -> SqliteWarehouse {
    let mut store = ArtifactStore::open(dir).unwrap();
    let w = SqliteWarehouse::open_in_memory().unwrap();
    let p = common::shipped_pipelines();
    for (id, raw) in [
        (101, common::TRANSCRIPT_101),
        (102, common::TRANSCRIPT_102),
        (103, common::TRANSCRIPT_103),
    ] {
        let file = store.write(ArtifactKey::transcript(id), &common::json(raw)).unwrap();
        load_transcript_file(&store, &w, &p.recording, &file).unwrap();
    }
    w
}

fn enhancer(w: Arc<dyn Warehouse>) -> Enhancer {
    let p = common::shipped_pipelines();
    Enhancer::new(w, p.transcripts, p.transcript_summary, WorkerPool::new(4, None))
}

fn f(v: &Value) -> f64 {
    v.as_f64().unwrap()
}

#[tokio::test]
async fn one_summary_row_per_transcribed_contact() {
    let dir = tempfile::tempdir().unwrap();
    let w = loaded_warehouse(dir.path());

    let report = enhancer(Arc::new(w.clone())).run().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.succeeded, vec![101, 102, 103]);

    let rows = w.rows(Table::EnhancedTranscripts, "contact_id").unwrap();
    assert_eq!(rows.len(), 3);

    let long = &rows[0];
    assert_eq!(f(&long["message_count"]), 4.0);
    assert_eq!(f(&long["agent_messages"]), 2.0);
    assert_eq!(f(&long["agent_share"]), 0.5);
    assert_eq!(f(&long["duration_seconds"]), 120.0);
    assert_eq!(f(&long["mean_gap_seconds"]), 40.0);
    assert_eq!(f(&long["max_gap_seconds"]), 60.0);
    assert_eq!(f(&long["participants"]), 2.0);
    assert_eq!(long["first_message_at"], Value::from("2019-01-01 10:00:05.000000"));

    // A single message has no gaps: undefined, stored as NULL.
    let short = &rows[1];
    assert_eq!(f(&short["message_count"]), 1.0);
    assert!(short["mean_gap_seconds"].is_null());
    assert!(short["max_gap_seconds"].is_null());
    assert_eq!(f(&short["duration_seconds"]), 0.0);

    let third = &rows[2];
    assert_eq!(f(&third["message_count"]), 3.0);
    assert_eq!(f(&third["visitor_messages"]), 2.0);
    assert_eq!(f(&third["mean_gap_seconds"]), 45.0);
    assert_eq!(f(&third["duration_seconds"]), 90.0);
    assert_eq!(third["last_message_at"], Value::from("2019-01-01 12:01:50.000000"));

    // Enhanced contacts are not picked up again.
    assert!(w.unenhanced_contacts().unwrap().is_empty());
    let again = enhancer(Arc::new(w.clone())).run().await.unwrap();
    assert!(again.succeeded.is_empty() && again.failed.is_empty());
}

/// Delegates to SQLite but cannot read one contact's transcript.
struct BrokenFor {
    inner: SqliteWarehouse,
    broken: ContactId,
}

impl Warehouse for BrokenFor {
    fn loaded_contact_files(&self) -> Result<BTreeSet<String>> {
        self.inner.loaded_contact_files()
    }
    fn loaded_transcript_contacts(&self) -> Result<BTreeSet<ContactId>> {
        self.inner.loaded_transcript_contacts()
    }
    fn contacts_missing_transcripts(&self) -> Result<Vec<ContactId>> {
        self.inner.contacts_missing_transcripts()
    }
    fn mark_transcripts_downloaded(&self, contact_ids: &[ContactId]) -> Result<usize> {
        self.inner.mark_transcripts_downloaded(contact_ids)
    }
    fn unenhanced_contacts(&self) -> Result<Vec<ContactId>> {
        self.inner.unenhanced_contacts()
    }
    fn transcript_frame(&self, contact_id: ContactId) -> Result<Frame> {
        if contact_id == self.broken {
            bail!("transcript rows for {contact_id} unreadable");
        }
        self.inner.transcript_frame(contact_id)
    }
    fn load(&self, batch: &LoadBatch) -> Result<usize> {
        self.inner.load(batch)
    }
}

#[tokio::test]
async fn one_failing_contact_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let w = loaded_warehouse(dir.path());
    let broken = BrokenFor {
        inner: w.clone(),
        broken: 101,
    };

    let report = enhancer(Arc::new(broken)).run().await.unwrap();

    assert_eq!(report.succeeded, vec![102, 103]);
    assert_eq!(report.failed_ids(), vec![101]);
    assert!(matches!(report.failed[0].1, UnitError::Failed(_)));
    assert_eq!(w.unenhanced_contacts().unwrap(), vec![101]);
    assert!(report.into_result().is_err());
}
