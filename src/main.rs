// src/main.rs
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use interaction_sync::config::transforms::TransformsConfig;
use interaction_sync::config::SyncConfig;
use interaction_sync::telemetry;
use interaction_sync::{
    ArtifactStore, DateRange, HttpInteractionService, InteractionType, Pipelines, SqliteWarehouse,
    StepRegistry, SyncError, SyncPipeline,
};

#[derive(Debug, Parser)]
#[command(name = "interaction-sync", version, about = "Incremental contact/transcript sync")]
struct Cli {
    /// Interaction type: IM, Voice or Email.
    #[arg(long = "type", default_value = "IM")]
    interaction_type: InteractionType,

    /// First day to fetch (YYYY-MM-DD). Requires --end.
    #[arg(long)]
    start: Option<String>,

    /// Last day to fetch, inclusive (YYYY-MM-DD). Requires --start.
    #[arg(long)]
    end: Option<String>,

    /// Run config (TOML or JSON); else INTERACTION_SYNC_CONFIG / config/sync.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON log lines instead of compact text.
    #[arg(long, env = "INTERACTION_SYNC_LOG_JSON")]
    log_json: bool,
}

async fn run(cli: Cli) -> Result<()> {
    let range = DateRange::resolve(cli.start.as_deref(), cli.end.as_deref())?;

    let config = match &cli.config {
        Some(p) => SyncConfig::load_from_file(p)?,
        None => SyncConfig::load_default()?,
    };
    let transforms = TransformsConfig::load_default(Some(&config.transforms_path))?;
    let pipelines = Pipelines::compile(&transforms, &StepRegistry::builtin())
        .context("compiling transform pipelines")?;

    let recorder = match &config.metrics_textfile {
        Some(_) => Some(telemetry::install_recorder()?),
        None => None,
    };

    let service = Arc::new(HttpInteractionService::new(&config.service)?);
    let warehouse = Arc::new(SqliteWarehouse::open(&config.database.path)?);
    let store = ArtifactStore::open(&config.output_dir)?;

    let mut pipeline = SyncPipeline::new(service, warehouse, store, pipelines, &config);
    let outcome = pipeline.run(cli.interaction_type, range).await;

    if let (Some(handle), Some(path)) = (&recorder, &config.metrics_textfile) {
        if let Err(e) = telemetry::write_textfile(handle, path) {
            warn!(error = ?e, "could not write metrics textfile");
        }
    }

    let summary = outcome?;
    info!(
        contact_files = summary.contact_files_written,
        contacts = summary.contacts_loaded,
        transcripts = summary.transcripts_fetched,
        "done"
    );
    if let Some(report) = summary.enhancement {
        report.into_result()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "sync failed");
            match e.downcast_ref::<SyncError>() {
                Some(SyncError::UsageError(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
