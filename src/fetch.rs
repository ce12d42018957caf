// src/fetch.rs
//! Chunked fetcher: contacts by whole-day window, transcripts by fixed-size chunk.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use serde_json::Value;
use tracing::{info, warn};

use crate::artifacts::{ArtifactKey, ArtifactStore};
use crate::error::SyncError;
use crate::model::{day_window, ContactId, DateRange, InteractionType};
use crate::service::InteractionService;
use crate::store::Warehouse;

pub fn yesterday() -> NaiveDate {
    Local::now().date_naive() - Duration::days(1)
}

/// One service call and one artifact per day of `range`. Without a range, a
/// single unbounded call (the service's default recent window) is stored
/// under yesterday's date. Returns the artifact file names in day order.
pub async fn download_contacts(
    service: &dyn InteractionService,
    store: &mut ArtifactStore,
    interaction_type: InteractionType,
    range: Option<DateRange>,
) -> Result<Vec<String>> {
    let mut written = Vec::new();
    match range {
        Some(range) => {
            for day in range.days() {
                let (start, end) = day_window(day);
                let records = service
                    .get_contacts(interaction_type, Some(&start), Some(&end))
                    .await
                    .with_context(|| format!("fetching {interaction_type} contacts for {day}"))?;
                info!(target: "sync", %interaction_type, %day, n = records.len(), "contacts fetched");
                let payload = Value::Array(records.into_iter().map(|r| r.payload).collect());
                written.push(store.write(ArtifactKey::contacts(interaction_type, day), &payload)?);
            }
        }
        None => {
            let records = service
                .get_contacts(interaction_type, None, None)
                .await
                .with_context(|| format!("fetching recent {interaction_type} contacts"))?;
            info!(target: "sync", %interaction_type, n = records.len(), "recent contacts fetched");
            let payload = Value::Array(records.into_iter().map(|r| r.payload).collect());
            written.push(store.write(ArtifactKey::contacts(interaction_type, yesterday()), &payload)?);
        }
    }
    Ok(written)
}

/// Fetch transcripts in chunks of `chunk_size`.
///
/// A chunk is accepted only if every requested id came back; otherwise the
/// whole operation fails with `IncompleteFetch` before anything of that chunk
/// is written. Accepted chunks are stored (one artifact per transcript, one
/// index save per chunk) and then flagged downloaded with one warehouse update
/// per chunk.
///
/// `contact_ids = None` asks the warehouse for contacts still missing transcripts.
pub async fn download_transcripts(
    service: &dyn InteractionService,
    store: &mut ArtifactStore,
    warehouse: &dyn Warehouse,
    contact_ids: Option<Vec<ContactId>>,
    chunk_size: usize,
) -> Result<usize> {
    let contact_ids = match contact_ids {
        Some(ids) => ids,
        None => warehouse.contacts_missing_transcripts()?,
    };
    if contact_ids.is_empty() {
        warn!(target: "sync", "no contact ids to fetch transcripts for");
        return Ok(0);
    }
    info!(target: "sync", n = contact_ids.len(), "fetching transcripts");

    let mut stored = 0;
    for chunk in contact_ids.chunks(chunk_size.max(1)) {
        let transcripts = service
            .get_recordings(chunk)
            .await
            .context("fetching transcripts")?;
        metrics::counter!("sync_transcript_chunks_total").increment(1);

        let requested: BTreeSet<ContactId> = chunk.iter().copied().collect();
        let returned: BTreeSet<ContactId> =
            transcripts.iter().filter_map(|t| t.interaction_id).collect();
        let missing: Vec<ContactId> = requested.difference(&returned).copied().collect();
        if !missing.is_empty() || transcripts.len() < chunk.len() {
            warn!(target: "sync", ?missing, "missing transcripts");
            return Err(SyncError::IncompleteFetch {
                requested: chunk.len(),
                returned: transcripts.len(),
                missing,
            }
            .into());
        }

        // Completeness above guarantees an id on every transcript.
        let artifacts = transcripts
            .iter()
            .filter_map(|t| t.interaction_id.map(|id| (ArtifactKey::transcript(id), &t.payload)));
        stored += store.write_all(artifacts)?.len();
        warehouse
            .mark_transcripts_downloaded(chunk)
            .context("marking chunk downloaded")?;
    }
    Ok(stored)
}
