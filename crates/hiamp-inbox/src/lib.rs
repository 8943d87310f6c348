// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-inbox
#![deny(unsafe_code)]
#![warn(missing_docs)]

use hiamp_integrity::fsio;
use hiamp_message::HiampMessage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::warn;

/// Errors from inbox persistence.
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    /// The worker id has invalid syntax.
    #[error("'{0}' is not a worker id")]
    BadWorker(String),

    /// The message id has invalid syntax.
    #[error("'{0}' is not a message id")]
    BadId(String),

    /// No entry stored under that id.
    #[error("message '{msg_id}' not in inbox of '{worker}'")]
    NotFound {
        /// Local worker whose inbox was searched.
        worker: String,
        /// Message id that was requested.
        msg_id: String,
    },

    /// Reading or writing an entry failed.
    #[error("inbox storage I/O: {0}")]
    Io(#[from] hiamp_integrity::IntegrityError),

    /// An entry file is not parseable.
    #[error("corrupt inbox entry '{path}': {reason}")]
    Corrupt {
        /// Offending file path.
        path: String,
        /// Parse error detail.
        reason: String,
    },
}

/// One received message as stored in a worker's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InboxEntry {
    /// The parsed message.
    pub message: HiampMessage,
    /// The raw envelope text exactly as received.
    pub raw: String,
    /// When this HQ recorded the message.
    pub received_at: String,
    /// Opaque transport endpoint the message arrived on.
    pub channel_id: String,
    /// Transport-native message reference, when the transport has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_ref: Option<String>,
    /// Whether the operator has read it.
    #[serde(default)]
    pub read: bool,
}

/// Result of adding an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// True when an entry with the same id already existed and was replaced
    /// (later arrival wins).
    pub duplicate: bool,
}

/// Disk-backed inbox, one directory per local worker.
#[derive(Debug, Clone)]
pub struct InboxStore {
    dir: PathBuf,
}

impl InboxStore {
    /// Open a store rooted at `dir` (per-worker subdirectories are created
    /// lazily).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn check_worker(worker: &str) -> Result<(), InboxError> {
        if hiamp_id::is_worker_segment(worker) {
            Ok(())
        } else {
            Err(InboxError::BadWorker(worker.to_string()))
        }
    }

    fn entry_path(&self, worker: &str, msg_id: &str) -> PathBuf {
        self.dir.join(worker).join(msg_id)
    }

    fn read_entry(&self, path: &std::path::Path) -> Result<InboxEntry, InboxError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            InboxError::Io(hiamp_integrity::IntegrityError::Io {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        serde_yaml::from_str(&text).map_err(|e| InboxError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn write_entry(&self, worker: &str, entry: &InboxEntry) -> Result<(), InboxError> {
        let path = self.entry_path(worker, &entry.message.id);
        let yaml = serde_yaml::to_string(entry).map_err(|e| InboxError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fsio::write_atomic(&path, yaml.as_bytes())?;
        Ok(())
    }

    /// Store an entry under its message id.
    ///
    /// A second arrival with the same id replaces the first; the caller is
    /// expected to surface the duplicate to the operator.
    pub fn add(&self, worker: &str, entry: &InboxEntry) -> Result<AddOutcome, InboxError> {
        Self::check_worker(worker)?;
        if !hiamp_id::is_message_id(&entry.message.id) {
            return Err(InboxError::BadId(entry.message.id.clone()));
        }
        let duplicate = self.entry_path(worker, &entry.message.id).exists();
        if duplicate {
            warn!(worker, id = %entry.message.id, "duplicate message id — overwriting");
        }
        self.write_entry(worker, entry)?;
        Ok(AddOutcome { duplicate })
    }

    /// Fetch one entry.
    pub fn get(&self, worker: &str, msg_id: &str) -> Result<Option<InboxEntry>, InboxError> {
        Self::check_worker(worker)?;
        if !hiamp_id::is_message_id(msg_id) {
            return Err(InboxError::BadId(msg_id.to_string()));
        }
        let path = self.entry_path(worker, msg_id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_entry(&path).map(Some)
    }

    /// List a worker's entries, newest file first; ties broken by id.
    ///
    /// With `include_read = false`, only unread entries are returned.
    pub fn list(&self, worker: &str, include_read: bool) -> Result<Vec<InboxEntry>, InboxError> {
        Self::check_worker(worker)?;
        let worker_dir = self.dir.join(worker);
        let entries = match std::fs::read_dir(&worker_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()), // nothing received yet
        };

        let mut rows: Vec<(SystemTime, String, InboxEntry)> = Vec::new();
        for dirent in entries.flatten() {
            let name = dirent.file_name().to_string_lossy().into_owned();
            if !hiamp_id::is_message_id(&name) {
                continue;
            }
            let entry = self.read_entry(&dirent.path())?;
            if !include_read && entry.read {
                continue;
            }
            let mtime = dirent
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            rows.push((mtime, name, entry));
        }

        rows.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(rows.into_iter().map(|(_, _, e)| e).collect())
    }

    /// Number of unread entries for a worker.
    pub fn unread_count(&self, worker: &str) -> Result<usize, InboxError> {
        Ok(self.list(worker, false)?.len())
    }

    /// Mark an entry read, returning the updated entry.
    pub fn mark_read(&self, worker: &str, msg_id: &str) -> Result<InboxEntry, InboxError> {
        let mut entry = self
            .get(worker, msg_id)?
            .ok_or_else(|| InboxError::NotFound {
                worker: worker.to_string(),
                msg_id: msg_id.to_string(),
            })?;
        if !entry.read {
            entry.read = true;
            self.write_entry(worker, &entry)?;
        }
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
