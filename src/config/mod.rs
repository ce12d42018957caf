// src/config/mod.rs
//! Run configuration: output directory, database, remote service, worker sizing.
//!
//! Lookup order for the config file:
//! 1) `$INTERACTION_SYNC_CONFIG`
//! 2) `config/sync.toml`
//! 3) `config/sync.json`
//! 4) built-in defaults

pub mod transforms;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "INTERACTION_SYNC_CONFIG";
pub const ENV_API_KEY: &str = "INTERACTION_API_KEY";

pub const DEFAULT_CHUNK_SIZE: usize = 20;
pub const DEFAULT_WORKERS: usize = 20;
const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 30;

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/interactions")
}
fn default_transforms_path() -> PathBuf {
    PathBuf::from("config/transforms.toml")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/interactions.db")
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_unit_timeout_secs() -> u64 {
    DEFAULT_UNIT_TIMEOUT_SECS
}
fn default_service_timeout_secs() -> u64 {
    DEFAULT_SERVICE_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_transforms_path")]
    pub transforms_path: PathBuf,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub enhance: EnhanceConfig,
    /// When set, a Prometheus text snapshot of the run's counters is written here
    /// (node-exporter textfile collector).
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub base_url: String,
    /// "ENV" means: read from `INTERACTION_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_service_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-unit timeout; 0 disables it.
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            transforms_path: default_transforms_path(),
            database: DatabaseConfig::default(),
            service: ServiceConfig::default(),
            fetch: FetchConfig::default(),
            enhance: EnhanceConfig::default(),
            metrics_textfile: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            timeout_secs: DEFAULT_SERVICE_TIMEOUT_SECS,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            unit_timeout_secs: DEFAULT_UNIT_TIMEOUT_SECS,
        }
    }
}

impl EnhanceConfig {
    pub fn unit_timeout(&self) -> Option<Duration> {
        (self.unit_timeout_secs > 0).then(|| Duration::from_secs(self.unit_timeout_secs))
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl SyncConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading sync config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: SyncConfig = match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?,
            _ => toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?,
        };
        cfg.finish()
    }

    /// Env var, then `config/sync.toml`, then `config/sync.json`, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in ["config/sync.toml", "config/sync.json"] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from_file(&p);
            }
        }
        Self::default().finish()
    }

    /// Resolve secrets and sanitize sizing knobs.
    fn finish(mut self) -> Result<Self> {
        if self.service.api_key.trim().eq_ignore_ascii_case("env") {
            self.service.api_key = std::env::var(ENV_API_KEY)
                .map_err(|_| anyhow!("Missing {ENV_API_KEY} env var"))?;
        }
        if self.fetch.chunk_size == 0 {
            self.fetch.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.enhance.workers == 0 {
            self.enhance.workers = DEFAULT_WORKERS;
        }
        if !self.service.base_url.is_empty()
            && !(self.service.base_url.starts_with("http://")
                || self.service.base_url.starts_with("https://"))
        {
            bail!("service.base_url must be an http(s) URL");
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn toml_with_partial_sections_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sync.toml");
        fs::write(
            &p,
            r#"
output_dir = "/tmp/out"
[fetch]
chunk_size = 0
[enhance]
workers = 4
"#,
        )
        .unwrap();
        let cfg = SyncConfig::load_from_file(&p).unwrap();
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.fetch.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.enhance.workers, 4);
        assert_eq!(cfg.enhance.unit_timeout_secs, DEFAULT_UNIT_TIMEOUT_SECS);
        assert_eq!(cfg.database.path, default_db_path());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sync.json");
        fs::write(&p, r#"{"service": {"base_url": "ftp://nope"}}"#).unwrap();
        assert!(SyncConfig::load_from_file(&p).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn api_key_env_indirection() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sync.toml");
        fs::write(
            &p,
            r#"
[service]
base_url = "https://api.example.test"
api_key = "ENV"
"#,
        )
        .unwrap();

        env::remove_var(ENV_API_KEY);
        assert!(SyncConfig::load_from_file(&p).is_err());

        env::set_var(ENV_API_KEY, "secret");
        let cfg = SyncConfig::load_from_file(&p).unwrap();
        assert_eq!(cfg.service.api_key, "secret");
        env::remove_var(ENV_API_KEY);
    }

    #[test]
    fn zero_timeout_disables_unit_timeout() {
        let mut e = EnhanceConfig::default();
        assert_eq!(e.unit_timeout(), Some(Duration::from_secs(300)));
        e.unit_timeout_secs = 0;
        assert_eq!(e.unit_timeout(), None);
    }
}
