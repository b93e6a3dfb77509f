//! Side files describing tmux sandboxes.
//!
//! tmux itself only knows session names, so everything else a sandbox carries
//! (workspace, creation time, template, metadata, environment) lives in
//! `<capture_dir>/<id>.json`. The same directory holds the transient
//! `<id>_<token>_output.txt` capture files, one per command invocation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::sandbox::BackendKind;

const CAPTURE_SUFFIX: &str = "_output.txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sandbox_id: String,
    pub workspace: PathBuf,
    pub created_at: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Variables exported into every command run in the session
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open the store, creating its directory if needed.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create capture directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, sandbox_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sandbox_id))
    }

    /// Capture file for a single invocation, keyed by its exit-marker token.
    pub fn capture_path(&self, sandbox_id: &str, token: &str) -> PathBuf {
        self.dir.join(format!("{}_{}{}", sandbox_id, token, CAPTURE_SUFFIX))
    }

    /// Every capture file left behind for `sandbox_id`.
    pub fn captures(&self, sandbox_id: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}_", sandbox_id);
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(CAPTURE_SUFFIX))
            })
            .map(|entry| entry.path())
            .collect();
        paths.sort();
        Ok(paths)
    }

    pub fn contains(&self, sandbox_id: &str) -> bool {
        self.record_path(sandbox_id).exists()
    }

    /// Write the record atomically so readers never see a half-written file.
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let path = self.record_path(&record.sandbox_id);
        let json = serde_json::to_vec_pretty(record).context("Failed to serialize session record")?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temp file in {}", self.dir.display()))?;
        tmp.write_all(&json)
            .context("Failed to write session record")?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to persist {}", path.display()))?;

        debug!(sandbox_id = %record.sandbox_id, path = %path.display(), "store:saved");
        Ok(())
    }

    /// `Ok(None)` when no side file exists.
    pub fn load(&self, sandbox_id: &str) -> Result<Option<SessionRecord>> {
        let path = self.record_path(sandbox_id);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let record = serde_json::from_slice(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(record))
    }

    /// Delete the side file and any leftover capture file. Missing files are fine.
    pub fn remove(&self, sandbox_id: &str) -> Result<()> {
        let mut paths = self.captures(sandbox_id)?;
        paths.push(self.record_path(sandbox_id));
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "store:removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
                }
            }
        }
        Ok(())
    }

    /// Ids of every sandbox with a side file, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?;

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let id = name.strip_suffix(".json")?;
                BackendKind::Tmux.owns_id(id).then(|| id.to_string())
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}
