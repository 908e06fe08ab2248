use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{config_dir, ConfigError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub index: usize,
    pub text: String,
    #[serde(default)]
    pub executed_at_unix_ms: u128,
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Executed queries in insertion order; never holds two equal neighbours.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored entry, or `None` when `text` repeats the last one.
    pub fn append(&mut self, text: impl Into<String>) -> Option<&HistoryEntry> {
        self.append_at(text, unix_timestamp_millis())
    }

    fn append_at(&mut self, text: impl Into<String>, executed_at_unix_ms: u128) -> Option<&HistoryEntry> {
        let text = text.into();
        if self.entries.last().is_some_and(|last| last.text == text) {
            return None;
        }

        self.entries.push(HistoryEntry {
            index: self.entries.len(),
            text,
            executed_at_unix_ms,
        });
        self.entries.last()
    }

    #[must_use]
    pub fn all(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("failed to resolve default config path: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid history path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create history directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read history file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize history entry: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append history entry at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Newline-delimited JSON file backing the history across sessions.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn load_default() -> Result<Self, HistoryStoreError> {
        Ok(Self {
            path: config_dir()?.join("history.ndjson"),
        })
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuilds the log from disk. Unreadable lines are skipped so a single
    /// corrupt record does not cost the whole history.
    pub fn load(&self) -> Result<HistoryLog, HistoryStoreError> {
        let mut log = HistoryLog::new();
        if !self.path.exists() {
            return Ok(log);
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| HistoryStoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => {
                    log.append_at(entry.text, entry.executed_at_unix_ms);
                }
                Err(error) => tracing::warn!(%error, "skipping malformed history line"),
            }
        }
        Ok(log)
    }

    pub fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryStoreError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| HistoryStoreError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| HistoryStoreError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered = serde_json::to_string(entry)
            .map_err(|source| HistoryStoreError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryStoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| HistoryStoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{unix_timestamp_millis, FileHistoryStore, HistoryLog};

    #[test]
    fn adjacent_duplicates_are_suppressed() {
        let mut log = HistoryLog::new();
        assert!(log.append("A").is_some());
        assert!(log.append("A").is_none());
        assert!(log.append("B").is_some());

        let texts: Vec<&str> = log.all().iter().map(|entry| entry.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[test]
    fn non_adjacent_repeats_are_kept_with_increasing_indexes() {
        let mut log = HistoryLog::new();
        log.append("A");
        log.append("B");
        log.append("A");

        let indexes: Vec<usize> = log.all().iter().map(|entry| entry.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(log.get(2).map(|entry| entry.text.as_str()), Some("A"));
        assert!(log.get(3).is_none());
    }

    #[test]
    fn store_round_trips_entries_and_skips_bad_lines() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("nested").join("history.ndjson");
        let store = FileHistoryStore::from_path(&path);

        let mut log = HistoryLog::new();
        for text in ["SELECT 1", "SHOW TABLES"] {
            let entry = log.append(text).expect("entry should be stored").clone();
            store.append(&entry).expect("failed to append entry");
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut file| std::io::Write::write_all(&mut file, b"{not json}\n"))
            .expect("failed to append garbage");

        let reloaded = store.load().expect("failed to load history");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.all()[1].text, "SHOW TABLES");
        assert_eq!(reloaded.all()[1].index, 1);
    }

    #[test]
    fn missing_store_loads_empty_log() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = FileHistoryStore::from_path(temp_dir.path().join("history.ndjson"));
        assert!(store.load().expect("missing file should load").is_empty());
    }

    #[test]
    fn timestamp_uses_unix_epoch_millis() {
        assert!(unix_timestamp_millis() > 0);
    }
}
