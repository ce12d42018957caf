// src/pipeline.rs
//! Top-level run. Stages are strictly sequential; each completes before the
//! next begins:
//!
//! 1. download contacts (one artifact per day)
//! 2. reconcile + load contact files
//! 3. IM only: download transcripts for contacts still missing them
//! 4. reconcile + load transcript files
//! 5. enhancement (the only concurrent stage)

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::config::transforms::TransformsConfig;
use crate::config::SyncConfig;
use crate::enhance::{EnhancementReport, Enhancer, WorkerPool};
use crate::error::TransformError;
use crate::fetch::{download_contacts, download_transcripts, yesterday};
use crate::loader::{load_contacts_file, load_transcript_file};
use crate::model::{DateRange, InteractionType};
use crate::reconcile::{contacts_to_load, transcripts_to_load};
use crate::service::InteractionService;
use crate::store::Warehouse;
use crate::telemetry::ensure_metrics_described;
use crate::transform::{PipelineKind, StepRegistry, Transformer};

/// The four compiled pipelines. All are validated up front so a bad step name
/// fails before anything is fetched.
pub struct Pipelines {
    pub contacts: Transformer,
    pub recording: Transformer,
    pub transcripts: Transformer,
    pub transcript_summary: Transformer,
}

impl Pipelines {
    pub fn compile(cfg: &TransformsConfig, registry: &StepRegistry) -> Result<Self, TransformError> {
        Ok(Self {
            contacts: Transformer::from_config(PipelineKind::Contacts, cfg, registry)?,
            recording: Transformer::from_config(PipelineKind::Recording, cfg, registry)?,
            transcripts: Transformer::from_config(PipelineKind::Transcripts, cfg, registry)?,
            transcript_summary: Transformer::from_config(
                PipelineKind::TranscriptSummary,
                cfg,
                registry,
            )?,
        })
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub contact_files_written: usize,
    pub contacts_loaded: usize,
    pub transcripts_fetched: usize,
    pub transcript_rows_loaded: usize,
    /// `None` when the run stopped before enhancement (non-IM types).
    pub enhancement: Option<EnhancementReport>,
}

pub struct SyncPipeline {
    service: Arc<dyn InteractionService>,
    warehouse: Arc<dyn Warehouse>,
    store: ArtifactStore,
    pipelines: Pipelines,
    chunk_size: usize,
    pool: WorkerPool,
}

impl SyncPipeline {
    pub fn new(
        service: Arc<dyn InteractionService>,
        warehouse: Arc<dyn Warehouse>,
        store: ArtifactStore,
        pipelines: Pipelines,
        config: &SyncConfig,
    ) -> Self {
        Self {
            service,
            warehouse,
            store,
            pipelines,
            chunk_size: config.fetch.chunk_size,
            pool: WorkerPool::new(config.enhance.workers, config.enhance.unit_timeout()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// No range means yesterday.
    pub async fn run(
        &mut self,
        interaction_type: InteractionType,
        range: Option<DateRange>,
    ) -> Result<RunSummary> {
        ensure_metrics_described();
        let range = range.unwrap_or_else(|| DateRange::single(yesterday()));
        info!(
            target: "sync",
            service = self.service.name(),
            %interaction_type,
            start = %range.start,
            end = %range.end,
            "sync run starting"
        );
        let mut summary = RunSummary::default();

        let adopted = self.store.refresh().context("refreshing artifact index")?;
        if adopted > 0 {
            info!(target: "sync", adopted, "picked up artifacts from earlier runs");
        }

        let t = Instant::now();
        summary.contact_files_written = download_contacts(
            self.service.as_ref(),
            &mut self.store,
            interaction_type,
            Some(range),
        )
        .await?
        .len();
        stage_done("download_contacts", t);

        let t = Instant::now();
        for file in contacts_to_load(&self.store, self.warehouse.as_ref())? {
            summary.contacts_loaded += load_contacts_file(
                &self.store,
                self.warehouse.as_ref(),
                &self.pipelines.contacts,
                &file,
            )?;
            self.store.mark_loaded(&file)?;
        }
        stage_done("load_contacts", t);

        if !interaction_type.has_transcripts() {
            info!(target: "sync", %interaction_type, "no transcripts for this type; done");
            return Ok(summary);
        }

        let t = Instant::now();
        summary.transcripts_fetched = download_transcripts(
            self.service.as_ref(),
            &mut self.store,
            self.warehouse.as_ref(),
            None,
            self.chunk_size,
        )
        .await?;
        stage_done("download_transcripts", t);

        let t = Instant::now();
        for (_, file) in transcripts_to_load(&self.store, self.warehouse.as_ref())? {
            summary.transcript_rows_loaded += load_transcript_file(
                &self.store,
                self.warehouse.as_ref(),
                &self.pipelines.recording,
                &file,
            )?;
            self.store.mark_loaded(&file)?;
        }
        stage_done("load_transcripts", t);

        let t = Instant::now();
        let enhancer = Enhancer::new(
            Arc::clone(&self.warehouse),
            self.pipelines.transcripts.clone(),
            self.pipelines.transcript_summary.clone(),
            self.pool,
        );
        summary.enhancement = Some(enhancer.run().await?);
        stage_done("enhance", t);

        info!(
            target: "sync",
            contacts = summary.contacts_loaded,
            transcripts = summary.transcripts_fetched,
            transcript_rows = summary.transcript_rows_loaded,
            "sync run finished"
        );
        Ok(summary)
    }
}

fn stage_done(stage: &'static str, started: Instant) {
    let ms = started.elapsed().as_secs_f64() * 1_000.0;
    metrics::histogram!("sync_stage_ms", "stage" => stage).record(ms);
    info!(target: "sync", stage, elapsed_ms = ms as u64, "stage finished");
}
