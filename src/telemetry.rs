// src/telemetry.rs
//! Tracing subscriber and metric descriptions.

use std::path::Path;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::artifacts::atomic_write;

const DEFAULT_FILTER: &str = "sync=info,interaction_sync=info,warn";

/// `RUST_LOG` wins over the default filter. Safe to call more than once.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_artifacts_written_total", "Raw artifacts written to the output dir.");
        describe_counter!("sync_rows_loaded_total", "Rows loaded into the warehouse, by table.");
        describe_counter!("sync_transcript_chunks_total", "Transcript chunks requested from the service.");
        describe_counter!("sync_enhance_units_total", "Enhancement units attempted.");
        describe_counter!("sync_enhance_failures_total", "Enhancement units that failed, panicked or timed out.");
        describe_histogram!("sync_stage_ms", "Wall time per pipeline stage in milliseconds.");
    });
}

/// Install a Prometheus recorder for this process. Only the first call installs;
/// later calls return the same handle.
pub fn install_recorder() -> Result<PrometheusHandle> {
    static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
    let handle = HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")
    })?;
    ensure_metrics_described();
    Ok(handle.clone())
}

/// Textfile-collector snapshot, replaced atomically.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    atomic_write(path, handle.render().as_bytes())
}
