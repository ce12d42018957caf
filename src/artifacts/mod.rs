// src/artifacts/mod.rs
//! Filesystem artifact store: raw fetched payloads, one JSON document per file,
//! plus the manifest that records what has been fetched and loaded.

pub mod index;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub use index::{sha256_hex, ArtifactEntry, ArtifactIndex, ArtifactKey, INDEX_FILE};

pub struct ArtifactStore {
    dir: PathBuf,
    index: ArtifactIndex,
}

impl ArtifactStore {
    /// Create the output directory if needed and load its manifest.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating output dir {}", dir.display()))?;
        let index = ArtifactIndex::load(&dir.join(INDEX_FILE))?;
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Serialize `payload` under the key's file name and record it in the index.
    /// An existing artifact with the same key is overwritten.
    pub fn write(&mut self, key: ArtifactKey, payload: &Value) -> Result<String> {
        let name = self.put(key, payload)?;
        self.save_index()?;
        Ok(name)
    }

    /// Like `write` for many artifacts, with a single index save at the end.
    /// If one fails, the ones before it are on disk but unindexed; `refresh`
    /// adopts them.
    pub fn write_all<'a, I>(&mut self, items: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = (ArtifactKey, &'a Value)>,
    {
        let mut names = Vec::new();
        for (key, payload) in items {
            names.push(self.put(key, payload)?);
        }
        if !names.is_empty() {
            self.save_index()?;
        }
        Ok(names)
    }

    fn put(&mut self, key: ArtifactKey, payload: &Value) -> Result<String> {
        let name = key.file_name();
        let bytes = serde_json::to_vec(payload).context("serializing artifact payload")?;
        atomic_write(&self.path_of(&name), &bytes)?;
        let entry = ArtifactEntry {
            key,
            sha256: sha256_hex(&bytes),
            fetched_at: Utc::now(),
            loaded_at: None,
        };
        self.index.insert(name.clone(), entry);
        metrics::counter!("sync_artifacts_written_total").increment(1);
        debug!(target: "sync", file = %name, bytes = bytes.len(), "artifact written");
        Ok(name)
    }

    pub fn read(&self, file_name: &str) -> Result<Value> {
        let path = self.path_of(file_name);
        let content =
            fs::read(&path).with_context(|| format!("reading artifact {}", path.display()))?;
        serde_json::from_slice(&content).with_context(|| format!("parsing artifact {}", path.display()))
    }

    /// Adopt artifacts present on disk but missing from the index. Returns the
    /// number adopted. A transcript-like file whose id cannot be parsed is an error.
    pub fn refresh(&mut self) -> Result<usize> {
        let mut adopted = 0;
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("listing output dir {}", self.dir.display()))?;
        for e in entries {
            let e = e.context("reading output dir entry")?;
            if !e.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = e.file_name().to_string_lossy().to_string();
            if self.index.contains(&name) {
                continue;
            }
            let Some(key) = ArtifactKey::parse(&name)? else {
                continue;
            };
            let bytes = fs::read(e.path())
                .with_context(|| format!("reading artifact {}", e.path().display()))?;
            let fetched_at = e
                .metadata()
                .and_then(|m| m.modified())
                .map(chrono::DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            self.index.insert(
                name,
                ArtifactEntry {
                    key,
                    sha256: sha256_hex(&bytes),
                    fetched_at,
                    loaded_at: None,
                },
            );
            adopted += 1;
        }
        if adopted > 0 {
            info!(target: "sync", adopted, "adopted unindexed artifacts");
            self.save_index()?;
        }
        Ok(adopted)
    }

    /// Record a successful load, including one that produced no rows.
    /// Reconciliation treats the artifact as handled until it is re-fetched.
    pub fn mark_loaded(&mut self, file_name: &str) -> Result<()> {
        if let Some(entry) = self.index.entries.get_mut(file_name) {
            entry.loaded_at = Some(Utc::now());
            self.save_index()?;
        }
        Ok(())
    }

    fn save_index(&self) -> Result<()> {
        let json = self.index.to_json()?;
        atomic_write(&self.dir.join(INDEX_FILE), json.as_bytes())
    }
}

/// Write to a temp file next to `dest`, then persist it over `dest`. The temp
/// file is removed if anything fails before the persist completes.
pub(crate) fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("writing temp file for {}", dest.display()))?;
    tmp.persist(dest)
        .map_err(|e| anyhow!(e.error))
        .with_context(|| format!("replacing {}", dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;

    #[test]
    fn write_records_entry_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::open(dir.path()).unwrap();
        let name = store
            .write(ArtifactKey::transcript(7), &json!({"Value": {"ContactID": 7}}))
            .unwrap();
        assert_eq!(name, "7_data.txt");

        let reopened = ArtifactStore::open(dir.path()).unwrap();
        let entry = reopened.index().get("7_data.txt").unwrap();
        assert_eq!(entry.key, ArtifactKey::transcript(7));
        assert_eq!(entry.sha256.len(), 64);
        assert_eq!(reopened.read("7_data.txt").unwrap()["Value"]["ContactID"], json!(7));
    }

    fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::open(dir.path()).unwrap();
        // A non-empty directory in the artifact's place makes the final replace fail.
        fs::create_dir(dir.path().join("7_data.txt")).unwrap();
        fs::write(dir.path().join("7_data.txt").join("keep"), "x").unwrap();

        let res = store.write(ArtifactKey::transcript(7), &json!({"Value": {"ContactID": 7}}));

        assert!(res.is_err());
        assert_eq!(dir_listing(dir.path()), vec!["7_data.txt"]);
        assert!(!store.index().contains("7_data.txt"));
    }

    #[test]
    fn write_all_indexes_every_artifact_once_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::open(dir.path()).unwrap();
        let payloads: Vec<(ArtifactKey, Value)> = (1..=3)
            .map(|id| (ArtifactKey::transcript(id), json!({"Value": {"ContactID": id}})))
            .collect();
        let names = store
            .write_all(payloads.iter().map(|(k, v)| (k.clone(), v)))
            .unwrap();
        assert_eq!(names, vec!["1_data.txt", "2_data.txt", "3_data.txt"]);

        let reopened = ArtifactStore::open(dir.path()).unwrap();
        assert_eq!(reopened.index().transcripts().count(), 3);
        assert_eq!(
            dir_listing(dir.path()),
            vec!["1_data.txt", "2_data.txt", "3_data.txt", INDEX_FILE]
        );
    }

    #[test]
    fn refresh_adopts_legacy_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IM_2019-01-01_contacts.txt"), "[]").unwrap();
        fs::write(dir.path().join("12_data.txt"), "{}").unwrap();
        fs::write(dir.path().join("README"), "x").unwrap();
        let mut store = ArtifactStore::open(dir.path()).unwrap();
        assert_eq!(store.refresh().unwrap(), 2);
        assert_eq!(store.refresh().unwrap(), 0);
        assert_eq!(store.index().contact_files().count(), 1);
        assert_eq!(store.index().transcripts().collect::<Vec<_>>(), vec![(12, "12_data.txt")]);
    }

    #[test]
    fn refresh_surfaces_malformed_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x1_data.txt"), "{}").unwrap();
        let mut store = ArtifactStore::open(dir.path()).unwrap();
        let err = store.refresh().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MalformedArtifactName { .. })
        ));
    }
}
