// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-thread
#![deny(unsafe_code)]
#![warn(missing_docs)]

use hiamp_id::Address;
use hiamp_integrity::fsio;
use hiamp_message::{HiampMessage, Intent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors from thread persistence.
#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    /// The id does not match `thr-[a-z0-9]{8,}`.
    #[error("'{0}' is not a thread id")]
    BadId(String),

    /// The thread does not exist on disk.
    #[error("thread '{0}' not found")]
    NotFound(String),

    /// Reading or writing the thread file failed.
    #[error("thread storage I/O: {0}")]
    Io(#[from] hiamp_integrity::IntegrityError),

    /// The thread file is not parseable.
    #[error("corrupt thread file '{path}': {reason}")]
    Corrupt {
        /// Offending file path.
        path: String,
        /// Parse error detail.
        reason: String,
    },
}

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// Accepting appends.
    #[default]
    Open,
    /// Closed by the operator; appends still succeed (history is immutable,
    /// closure is advisory).
    Closed,
}

/// One message as recorded in a thread log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThreadMessage {
    /// Message id.
    pub id: String,
    /// Sender address.
    pub from: Address,
    /// Recipient address.
    pub to: Address,
    /// Intent.
    pub intent: Intent,
    /// Body text.
    pub body: String,
    /// Weak reference to a prior message id, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// When this HQ recorded the message.
    pub timestamp: String,
}

/// Persistent per-thread record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThreadState {
    /// Thread id.
    pub id: String,
    /// Open or closed.
    pub status: ThreadStatus,
    /// Addresses seen on this thread, insertion-ordered, unique.
    pub participants: Vec<Address>,
    /// Append-only message sequence.
    pub messages: Vec<ThreadMessage>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last-append timestamp.
    pub updated_at: String,
}

impl ThreadState {
    fn note_participant(&mut self, addr: &Address) {
        if !self.participants.contains(addr) {
            self.participants.push(addr.clone());
        }
    }
}

/// Cheap listing row for one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThreadSummary {
    /// Thread id.
    pub id: String,
    /// Open or closed.
    pub status: ThreadStatus,
    /// Participants, insertion-ordered.
    pub participants: Vec<Address>,
    /// Number of recorded messages.
    pub message_count: usize,
    /// Last-append timestamp.
    pub updated_at: String,
}

/// Disk-backed store of thread logs, one file per thread id.
#[derive(Debug, Clone)]
pub struct ThreadStore {
    dir: PathBuf,
}

impl ThreadStore {
    /// Open a store rooted at `dir` (created lazily on first append).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file(&self, thread_id: &str) -> PathBuf {
        self.dir.join(thread_id)
    }

    fn check_id(thread_id: &str) -> Result<(), ThreadError> {
        if hiamp_id::is_thread_id(thread_id) {
            Ok(())
        } else {
            Err(ThreadError::BadId(thread_id.to_string()))
        }
    }

    fn read(&self, path: &Path) -> Result<ThreadState, ThreadError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ThreadError::Io(hiamp_integrity::IntegrityError::Io {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        serde_yaml::from_str(&text).map_err(|e| ThreadError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn write(&self, state: &ThreadState) -> Result<(), ThreadError> {
        let yaml = serde_yaml::to_string(state).map_err(|e| ThreadError::Corrupt {
            path: self.file(&state.id).display().to_string(),
            reason: e.to_string(),
        })?;
        fsio::write_atomic(&self.file(&state.id), yaml.as_bytes())?;
        Ok(())
    }

    /// Load a thread, or `None` if it has never been written.
    pub fn load(&self, thread_id: &str) -> Result<Option<ThreadState>, ThreadError> {
        Self::check_id(thread_id)?;
        let path = self.file(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        self.read(&path).map(Some)
    }

    /// Append a message to a thread, creating the thread on first use.
    ///
    /// Participants are recorded in order of first appearance. A `reply-to`
    /// that references an id absent from this thread is kept verbatim.
    pub fn append_message(
        &self,
        thread_id: &str,
        msg: &HiampMessage,
    ) -> Result<ThreadState, ThreadError> {
        Self::check_id(thread_id)?;
        let now = hiamp_id::utc_timestamp();
        let mut state = self.load(thread_id)?.unwrap_or_else(|| {
            debug!(thread = thread_id, "creating thread");
            ThreadState {
                id: thread_id.to_string(),
                status: ThreadStatus::Open,
                participants: Vec::new(),
                messages: Vec::new(),
                created_at: now.clone(),
                updated_at: now.clone(),
            }
        });

        state.note_participant(&msg.from);
        state.note_participant(&msg.to);
        state.messages.push(ThreadMessage {
            id: msg.id.clone(),
            from: msg.from.clone(),
            to: msg.to.clone(),
            intent: msg.intent,
            body: msg.body.clone(),
            reply_to: msg.reply_to.clone(),
            timestamp: now.clone(),
        });
        state.updated_at = now;

        self.write(&state)?;
        Ok(state)
    }

    /// Whether a message id already appears in the given thread.
    pub fn contains_message(&self, thread_id: &str, msg_id: &str) -> Result<bool, ThreadError> {
        Ok(self
            .load(thread_id)?
            .is_some_and(|s| s.messages.iter().any(|m| m.id == msg_id)))
    }

    /// Summaries of every thread in the store, sorted by id.
    pub fn list(&self) -> Result<Vec<ThreadSummary>, ThreadError> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(out), // no appends yet
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !hiamp_id::is_thread_id(&name) {
                continue; // temp files and strays
            }
            let state = self.read(&entry.path())?;
            out.push(ThreadSummary {
                id: state.id,
                status: state.status,
                participants: state.participants,
                message_count: state.messages.len(),
                updated_at: state.updated_at,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Mark a thread closed.
    ///
    /// # Errors
    ///
    /// [`ThreadError::NotFound`] if the thread has never been written.
    pub fn close(&self, thread_id: &str) -> Result<ThreadState, ThreadError> {
        let mut state = self
            .load(thread_id)?
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        state.status = ThreadStatus::Closed;
        state.updated_at = hiamp_id::utc_timestamp();
        self.write(&state)?;
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str, to: &str, body: &str) -> HiampMessage {
        HiampMessage::builder(from, to)
            .unwrap()
            .intent(Intent::Inform)
            .body(body)
            .build()
    }

    #[test]
    fn first_append_creates_the_thread() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        let state = store
            .append_message("thr-aabbccdd", &msg("a1/w1", "b2/w2", "hello"))
            .unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.status, ThreadStatus::Open);
        assert_eq!(state.created_at, state.updated_at);
        assert!(dir.path().join("thr-aabbccdd").exists());
    }

    #[test]
    fn appends_accumulate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        store.append_message("thr-aabbccdd", &msg("a1/w1", "b2/w2", "one")).unwrap();
        store.append_message("thr-aabbccdd", &msg("b2/w2", "a1/w1", "two")).unwrap();
        let state = store.load("thr-aabbccdd").unwrap().unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].body, "one");
        assert_eq!(state.messages[1].body, "two");
    }

    #[test]
    fn participants_are_insertion_ordered_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        store.append_message("thr-aabbccdd", &msg("a1/w1", "b2/w2", "x")).unwrap();
        store.append_message("thr-aabbccdd", &msg("b2/w2", "a1/w1", "y")).unwrap();
        let state = store
            .append_message("thr-aabbccdd", &msg("c3/w3", "a1/w1", "z"))
            .unwrap();
        let names: Vec<String> = state.participants.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a1/w1", "b2/w2", "c3/w3"]);
    }

    #[test]
    fn dangling_reply_to_is_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        let reply = HiampMessage::builder("a1/w1", "b2/w2")
            .unwrap()
            .body("replying")
            .reply_to("msg-00000000")
            .build();
        let state = store.append_message("thr-aabbccdd", &reply).unwrap();
        assert_eq!(state.messages[0].reply_to.as_deref(), Some("msg-00000000"));
    }

    #[test]
    fn contains_message_sees_appended_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        let m = msg("a1/w1", "b2/w2", "x");
        store.append_message("thr-aabbccdd", &m).unwrap();
        assert!(store.contains_message("thr-aabbccdd", &m.id).unwrap());
        assert!(!store.contains_message("thr-aabbccdd", "msg-ffffffff").unwrap());
        assert!(!store.contains_message("thr-11111111", &m.id).unwrap());
    }

    #[test]
    fn list_returns_summaries_sorted_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        store.append_message("thr-bbbbbbbb", &msg("a1/w1", "b2/w2", "x")).unwrap();
        store.append_message("thr-aaaaaaaa", &msg("a1/w1", "b2/w2", "y")).unwrap();
        store.append_message("thr-aaaaaaaa", &msg("b2/w2", "a1/w1", "z")).unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "thr-aaaaaaaa");
        assert_eq!(list[0].message_count, 2);
        assert_eq!(list[1].id, "thr-bbbbbbbb");
    }

    #[test]
    fn list_on_empty_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn close_flips_status_and_appends_still_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        store.append_message("thr-aabbccdd", &msg("a1/w1", "b2/w2", "x")).unwrap();
        let closed = store.close("thr-aabbccdd").unwrap();
        assert_eq!(closed.status, ThreadStatus::Closed);
        let after = store
            .append_message("thr-aabbccdd", &msg("b2/w2", "a1/w1", "late"))
            .unwrap();
        assert_eq!(after.status, ThreadStatus::Closed);
        assert_eq!(after.messages.len(), 2);
    }

    #[test]
    fn close_of_unknown_thread_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        assert!(matches!(
            store.close("thr-deadbeef"),
            Err(ThreadError::NotFound(_))
        ));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        assert!(matches!(
            store.append_message("not-a-thread", &msg("a1/w1", "b2/w2", "x")),
            Err(ThreadError::BadId(_))
        ));
        assert!(matches!(store.load("msg-aabbccdd"), Err(ThreadError::BadId(_))));
    }
}
