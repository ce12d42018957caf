// src/config/transforms.rs
//! Pipeline definitions: pipeline kind → ordered step list.
//!
//! ```toml
//! [[contacts]]
//! step = "flatten"
//! args = { separator = "_" }
//! ```
//!
//! Lookup order:
//! 1) `$INTERACTION_SYNC_TRANSFORMS`
//! 2) `config/transforms.toml`
//! 3) `config/transforms.json`

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::transform::{PipelineKind, StepSpec};

pub const ENV_TRANSFORMS_PATH: &str = "INTERACTION_SYNC_TRANSFORMS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformsConfig {
    pipelines: BTreeMap<PipelineKind, Vec<StepSpec>>,
}

impl TransformsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, kind: PipelineKind, steps: Vec<StepSpec>) -> Self {
        self.pipelines.insert(kind, steps);
        self
    }

    pub fn pipeline(&self, kind: PipelineKind) -> Option<&[StepSpec]> {
        self.pipelines.get(&kind).map(Vec::as_slice)
    }

    pub fn parse_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("parsing transforms TOML")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading transforms from {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let cfg: TransformsConfig = if is_json {
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        };
        Ok(cfg)
    }

    /// Env var, then `preferred` (usually `SyncConfig::transforms_path`), then the
    /// conventional `config/transforms.{toml,json}`. Unlike the run config there is
    /// no built-in fallback: a run without pipelines cannot load anything.
    pub fn load_default(preferred: Option<&Path>) -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_TRANSFORMS_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_TRANSFORMS_PATH} points to non-existent path"));
        }
        let mut candidates: Vec<PathBuf> = preferred.map(Path::to_path_buf).into_iter().collect();
        candidates.push(PathBuf::from("config/transforms.toml"));
        candidates.push(PathBuf::from("config/transforms.json"));
        for p in candidates {
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        bail!("no transforms config found (set {ENV_TRANSFORMS_PATH} or add config/transforms.toml)")
    }
}
