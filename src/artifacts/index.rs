// src/artifacts/index.rs
//! Artifact manifest (`artifact_index.json`) and the file naming convention.
//!
//! Contact batches are named `{type}_{yyyy-mm-dd}_contacts.txt`, transcripts
//! `{contact_id}_data.txt`. The names are still written that way so older runs
//! stay readable, but reconciliation reads keys from the manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{ContactId, InteractionType, DAY_FORMAT};

pub const INDEX_FILE: &str = "artifact_index.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKey {
    Contacts {
        interaction_type: InteractionType,
        date: NaiveDate,
    },
    Transcript {
        contact_id: ContactId,
    },
}

fn contacts_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+)_(\d{4}-\d{1,2}-\d{1,2})_contacts\.txt$").expect("contacts name regex")
    })
}

/// Anything ending in `_data.txt` claims to be a transcript.
fn transcript_like_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^\w*_data\.txt$").expect("transcript name regex"))
}

fn transcript_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)_data\.txt$").expect("transcript id regex"))
}

impl ArtifactKey {
    pub fn contacts(interaction_type: InteractionType, date: NaiveDate) -> Self {
        ArtifactKey::Contacts {
            interaction_type,
            date,
        }
    }

    pub fn transcript(contact_id: ContactId) -> Self {
        ArtifactKey::Transcript { contact_id }
    }

    pub fn file_name(&self) -> String {
        match self {
            ArtifactKey::Contacts {
                interaction_type,
                date,
            } => format!("{}_{}_contacts.txt", interaction_type, date.format(DAY_FORMAT)),
            ArtifactKey::Transcript { contact_id } => format!("{contact_id}_data.txt"),
        }
    }

    /// Parse a file name back into a key.
    ///
    /// `Ok(None)`: the file is not an artifact at all (e.g. the index itself).
    /// `Err(MalformedArtifactName)`: it looks like one but cannot be parsed.
    pub fn parse(file_name: &str) -> Result<Option<Self>, SyncError> {
        let malformed = || SyncError::MalformedArtifactName {
            file_name: file_name.to_string(),
        };
        if let Some(c) = contacts_re().captures(file_name) {
            let interaction_type = c[1].parse::<InteractionType>().map_err(|_| malformed())?;
            let date = NaiveDate::parse_from_str(&c[2], DAY_FORMAT).map_err(|_| malformed())?;
            return Ok(Some(Self::contacts(interaction_type, date)));
        }
        if transcript_like_re().is_match(file_name) {
            let id = transcript_re()
                .captures(file_name)
                .and_then(|c| c[1].parse::<ContactId>().ok())
                .ok_or_else(malformed)?;
            return Ok(Some(Self::transcript(id)));
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub key: ArtifactKey,
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

/// File name → entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, ArtifactEntry>,
}

impl ArtifactIndex {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading artifact index {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing artifact index {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing artifact index")
    }

    pub fn insert(&mut self, file_name: String, entry: ArtifactEntry) {
        self.entries.insert(file_name, entry);
    }

    pub fn get(&self, file_name: &str) -> Option<&ArtifactEntry> {
        self.entries.get(file_name)
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.entries.contains_key(file_name)
    }

    pub fn contact_files(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e.key, ArtifactKey::Contacts { .. }))
            .map(|(name, _)| name.as_str())
    }

    pub fn transcripts(&self) -> impl Iterator<Item = (ContactId, &str)> {
        self.entries.iter().filter_map(|(name, e)| match e.key {
            ArtifactKey::Transcript { contact_id } => Some((contact_id, name.as_str())),
            _ => None,
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
