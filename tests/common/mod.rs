// tests/common/mod.rs
#![allow(dead_code)]

use interaction_sync::config::transforms::TransformsConfig;
use interaction_sync::{Pipelines, StepRegistry};
use serde_json::Value;

pub const CONTACTS_IM: &str = include_str!("../fixtures/contacts_im.json");
pub const TRANSCRIPT_101: &str = include_str!("../fixtures/transcript_101.json");
pub const TRANSCRIPT_102: &str = include_str!("../fixtures/transcript_102.json");
pub const TRANSCRIPT_103: &str = include_str!("../fixtures/transcript_103.json");

pub fn json(s: &str) -> Value {
    serde_json::from_str(s).expect("fixture json")
}

/// The pipelines shipped in `config/transforms.toml`.
pub fn shipped_transforms() -> TransformsConfig {
    TransformsConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config/transforms.toml"))
        .expect("shipped transforms parse")
}

pub fn shipped_pipelines() -> Pipelines {
    Pipelines::compile(&shipped_transforms(), &StepRegistry::builtin()).expect("shipped pipelines compile")
}
