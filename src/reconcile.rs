// src/reconcile.rs
//! Which local artifacts are not yet reflected in persisted state.
//!
//! Known artifacts come from the artifact index; loaded ones from the
//! warehouse. An artifact that loaded zero rows leaves no trace in the
//! warehouse, so the index's `loaded_at` also counts as handled; a re-fetch
//! clears it. Nothing pending is a normal, silent outcome.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::model::ContactId;
use crate::store::Warehouse;

fn handled(store: &ArtifactStore, file_name: &str) -> bool {
    store
        .index()
        .get(file_name)
        .is_some_and(|e| e.loaded_at.is_some())
}

/// Contact artifact file names whose `load_file` does not appear in `contacts`.
pub fn contacts_to_load(store: &ArtifactStore, warehouse: &dyn Warehouse) -> Result<BTreeSet<String>> {
    let loaded = warehouse.loaded_contact_files()?;
    let pending: BTreeSet<String> = store
        .index()
        .contact_files()
        .filter(|name| !loaded.contains(*name) && !handled(store, name))
        .map(str::to_string)
        .collect();
    info!(target: "sync", pending = pending.len(), "contact files to load");
    Ok(pending)
}

/// Transcript artifacts (by contact id) whose id does not appear in `transcripts`.
pub fn transcripts_to_load(
    store: &ArtifactStore,
    warehouse: &dyn Warehouse,
) -> Result<BTreeMap<ContactId, String>> {
    let loaded = warehouse.loaded_transcript_contacts()?;
    let pending: BTreeMap<ContactId, String> = store
        .index()
        .transcripts()
        .filter(|(id, name)| !loaded.contains(id) && !handled(store, name))
        .map(|(id, name)| (id, name.to_string()))
        .collect();
    info!(target: "sync", pending = pending.len(), "transcripts to load");
    Ok(pending)
}
