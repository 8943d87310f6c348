// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only per-day transfer log.
//!
//! One YAML sequence per UTC day at `workspace/world/log/YYYY-MM-DD.yaml`.
//! Appends are serialized across processes with an `O_EXCL` lock file next
//! to the day file (stale locks are taken over after ten seconds). Readers
//! tolerate a partially appended trailing record by dropping it.

use crate::{TransferError, TransferType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Lifecycle events recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferEvent {
    /// An outbound bundle was produced and announced.
    Sent,
    /// An inbound bundle was observed.
    Received,
    /// The operator approved staging.
    Approved,
    /// The operator rejected the bundle.
    Rejected,
    /// Staged content was integrated into the live tree.
    Integrated,
    /// A failed bundle was retained for inspection.
    Quarantined,
}

/// Direction of the transfer relative to this HQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Produced by a peer, received here.
    Inbound,
    /// Produced here, sent to a peer.
    Outbound,
}

/// One log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransferLogEntry {
    /// When the event happened.
    pub timestamp: String,
    /// Which lifecycle event.
    pub event: TransferEvent,
    /// Transfer id.
    pub id: String,
    /// Inbound or outbound.
    pub direction: Direction,
    /// Bundle kind.
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
    /// The remote owner involved.
    pub peer: String,
    /// Where the bundle was staged (approved events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_to: Option<String>,
    /// Where content was integrated (integrated events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrated_to: Option<String>,
    /// Hash of the integrated file at integration time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_hash: Option<String>,
    /// Who approved (approved events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// Stable error code (rejected/quarantined events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable failure detail or rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TransferLogEntry {
    /// A minimally filled entry; event-specific fields start empty.
    #[must_use]
    pub fn new(
        event: TransferEvent,
        id: impl Into<String>,
        direction: Direction,
        transfer_type: TransferType,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: hiamp_id::utc_timestamp(),
            event,
            id: id.into(),
            direction,
            transfer_type,
            peer: peer.into(),
            staged_to: None,
            integrated_to: None,
            integration_hash: None,
            approved_by: None,
            error_code: None,
            error_detail: None,
        }
    }
}

/// The append-only per-day log.
#[derive(Debug, Clone)]
pub struct TransferLog {
    dir: PathBuf,
}

impl TransferLog {
    /// Open a log rooted at `dir` (usually `workspace/world/log`).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn day_file(&self, day: &str) -> PathBuf {
        self.dir.join(format!("{day}.yaml"))
    }

    /// Append one entry to today's file.
    ///
    /// Cross-process safety comes from an `O_EXCL` lock file; within the
    /// process the filesystem-level append is already atomic per entry.
    pub fn append(&self, entry: &TransferLogEntry) -> Result<(), TransferError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| TransferError::StageIo {
            detail: format!("create log dir: {e}"),
        })?;
        let path = self.day_file(&hiamp_id::utc_date());
        let record = serde_yaml::to_string(&[entry]).map_err(|e| TransferError::StageIo {
            detail: format!("serialize log entry: {e}"),
        })?;

        let _lock = LockFile::acquire(&path)?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TransferError::StageIo {
                detail: format!("open {}: {e}", path.display()),
            })?;
        file.write_all(record.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| TransferError::StageIo {
                detail: format!("append {}: {e}", path.display()),
            })
    }

    /// Read one day's records, dropping a malformed trailing record.
    pub fn read_day(&self, day: &str) -> Result<Vec<TransferLogEntry>, TransferError> {
        let path = self.day_file(day);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return Ok(Vec::new()),
        };
        match serde_yaml::from_str::<Vec<TransferLogEntry>>(&text) {
            Ok(entries) => Ok(entries),
            Err(first_error) => {
                // A crashed writer can leave a torn final record; retry with
                // the last record stripped before giving up.
                let Some(cut) = text.trim_end().rfind("\n- ") else {
                    warn!(day, error = %first_error, "unreadable log day");
                    return Ok(Vec::new());
                };
                match serde_yaml::from_str(&text[..cut + 1]) {
                    Ok(entries) => {
                        warn!(day, "dropped torn trailing log record");
                        Ok(entries)
                    }
                    Err(e) => Err(TransferError::StageIo {
                        detail: format!("unreadable log {}: {e}", path.display()),
                    }),
                }
            }
        }
    }

    /// All records across every day file, oldest day first.
    pub fn entries(&self) -> Result<Vec<TransferLogEntry>, TransferError> {
        let mut days: Vec<String> = match std::fs::read_dir(&self.dir) {
            Ok(read) => read
                .flatten()
                .filter_map(|e| {
                    e.file_name()
                        .to_str()
                        .and_then(|n| n.strip_suffix(".yaml"))
                        .map(str::to_string)
                })
                .collect(),
            Err(_) => return Ok(Vec::new()),
        };
        days.sort();
        let mut out = Vec::new();
        for day in days {
            out.extend(self.read_day(&day)?);
        }
        Ok(out)
    }

    /// Every record touching one transfer id.
    pub fn entries_for(&self, transfer_id: &str) -> Result<Vec<TransferLogEntry>, TransferError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.id == transfer_id)
            .collect())
    }

    /// The most recent `integrated` record for a local path, if any.
    ///
    /// Feeds conflict detection: a file modified after integration no longer
    /// matches its recorded `integration-hash`.
    pub fn latest_integrated(
        &self,
        local_path: &str,
    ) -> Result<Option<TransferLogEntry>, TransferError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| {
                e.event == TransferEvent::Integrated
                    && e.integrated_to.as_deref() == Some(local_path)
            })
            .next_back())
    }
}

/// `O_EXCL` lock file that is removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    const STALE_AFTER: Duration = Duration::from_secs(10);
    const RETRIES: u32 = 200;
    const RETRY_DELAY: Duration = Duration::from_millis(10);

    fn acquire(target: &Path) -> Result<Self, TransferError> {
        let path = target.with_extension("yaml.lock");
        for _ in 0..Self::RETRIES {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // Take over locks abandoned by a crashed writer.
                    if let Ok(meta) = std::fs::metadata(&path)
                        && let Ok(modified) = meta.modified()
                        && modified.elapsed().unwrap_or_default() > Self::STALE_AFTER
                    {
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    std::thread::sleep(Self::RETRY_DELAY);
                }
                Err(e) => {
                    return Err(TransferError::StageIo {
                        detail: format!("lock {}: {e}", path.display()),
                    });
                }
            }
        }
        Err(TransferError::StageIo {
            detail: format!("could not acquire {}", path.display()),
        })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
