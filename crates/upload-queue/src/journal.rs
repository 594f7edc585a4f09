//! Persisted record of unfinished uploads.
//!
//! Keeps `{taskId, remoteUploadId, file, params, endpoint}` for every task
//! that has not finished, so a later process can resume the remote uploads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use filmup_protocol::FileRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UploadError;
use crate::types::UploadTask;

/// One unfinished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_upload_id: Option<String>,
    pub file: FileRef,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub endpoint: String,
}

impl From<&UploadTask> for JournalEntry {
    fn from(task: &UploadTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            remote_upload_id: task.remote_upload_id.clone(),
            file: task.file.clone(),
            params: task.params.clone(),
            endpoint: task.endpoint.clone(),
        }
    }
}

/// JSON-file journal, cached in memory and rewritten on every change.
pub struct UploadJournal {
    path: PathBuf,
    entries: RwLock<Vec<JournalEntry>>,
}

impl UploadJournal {
    /// Opens the journal at `path`, loading existing entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let path = path.into();
        let entries = load_entries(&path)?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries, most recently enqueued first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, task_id: &str) -> Option<JournalEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.task_id == task_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a new entry at the front, or replaces the one with the same
    /// task id in place.
    pub fn upsert(&self, entry: JournalEntry) -> Result<(), UploadError> {
        {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match entries.iter_mut().find(|e| e.task_id == entry.task_id) {
                Some(existing) => *existing = entry,
                None => entries.insert(0, entry),
            }
        }
        self.save()
    }

    /// Drops the entry for `task_id`. Returns whether one existed.
    pub fn forget(&self, task_id: &str) -> Result<bool, UploadError> {
        let removed = {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            entries.retain(|e| e.task_id != task_id);
            entries.len() != before
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Writes the current entries to a sibling `.tmp` file and renames it
    /// over the journal, so a crash never leaves a truncated file.
    pub fn save(&self) -> Result<(), UploadError> {
        // Write lock: concurrent saves share the temp path.
        let entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let json = serde_json::to_string_pretty(&*entries)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(&self.path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} upload(s) to {:?}", entries.len(), self.path);
        Ok(())
    }
}

/// `uploads.json` -> `uploads.json.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn load_entries(path: &Path) -> Result<Vec<JournalEntry>, UploadError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<JournalEntry> = serde_json::from_str(&data)?;
    debug!("loaded {} upload(s) from {:?}", entries.len(), path);
    Ok(entries)
}
