// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical persisted-state layout under an HQ root.
//!
//! ```text
//! workspace/inbox/<worker>/<msg-id>               inbox entries
//! workspace/threads/hiamp/<thread-id>             thread state
//! workspace/world/peers/<peer>/manifest           cached peer manifests
//! workspace/world/inbox/<peer>/<type>/<txfr-id>/  staged bundles
//! workspace/world/quarantine/<txfr-id>/           quarantined bundles
//! workspace/world/log/YYYY-MM-DD.yaml             transfer log
//! ```

use crate::Settings;
use std::path::{Path, PathBuf};

/// Resolved filesystem layout for one HQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HqPaths {
    root: PathBuf,
    inbox_dir: PathBuf,
    thread_dir: PathBuf,
}

impl HqPaths {
    /// Build the layout for `root`, honouring directory overrides from
    /// `settings` (overrides are interpreted relative to the root).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Self {
        let root = root.into();
        let inbox_dir = root.join(
            settings
                .inbox_dir
                .as_deref()
                .unwrap_or("workspace/inbox"),
        );
        let thread_dir = root.join(
            settings
                .thread_log_dir
                .as_deref()
                .unwrap_or("workspace/threads/hiamp"),
        );
        Self {
            root,
            inbox_dir,
            thread_dir,
        }
    }

    /// The HQ root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every worker inbox.
    #[must_use]
    pub fn inbox_root(&self) -> &Path {
        &self.inbox_dir
    }

    /// Inbox directory for one local worker.
    #[must_use]
    pub fn worker_inbox(&self, worker: &str) -> PathBuf {
        self.inbox_dir.join(worker)
    }

    /// Directory holding every thread file.
    #[must_use]
    pub fn threads(&self) -> &Path {
        &self.thread_dir
    }

    /// Cached capability manifest for a peer.
    #[must_use]
    pub fn peer_manifest(&self, peer: &str) -> PathBuf {
        self.root.join("workspace/world/peers").join(peer).join("manifest")
    }

    /// Root of the world inbox (staged bundles).
    #[must_use]
    pub fn world_inbox(&self) -> PathBuf {
        self.root.join("workspace/world/inbox")
    }

    /// Staging destination for one approved bundle.
    #[must_use]
    pub fn staged_bundle(&self, peer: &str, transfer_type: &str, transfer_id: &str) -> PathBuf {
        self.world_inbox().join(peer).join(transfer_type).join(transfer_id)
    }

    /// Quarantine destination for one failed bundle.
    #[must_use]
    pub fn quarantined_bundle(&self, transfer_id: &str) -> PathBuf {
        self.root.join("workspace/world/quarantine").join(transfer_id)
    }

    /// Directory holding the per-day transfer log files.
    #[must_use]
    pub fn world_log(&self) -> PathBuf {
        self.root.join("workspace/world/log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_the_documented_tree() {
        let p = HqPaths::new("/hq", &Settings::default());
        assert_eq!(p.worker_inbox("architect"), Path::new("/hq/workspace/inbox/architect"));
        assert_eq!(p.threads(), Path::new("/hq/workspace/threads/hiamp"));
        assert_eq!(
            p.staged_bundle("stefan", "knowledge", "txfr-0011aabbccdd"),
            Path::new("/hq/workspace/world/inbox/stefan/knowledge/txfr-0011aabbccdd")
        );
        assert_eq!(
            p.quarantined_bundle("txfr-0011aabbccdd"),
            Path::new("/hq/workspace/world/quarantine/txfr-0011aabbccdd")
        );
        assert_eq!(p.world_log(), Path::new("/hq/workspace/world/log"));
        assert_eq!(
            p.peer_manifest("alex"),
            Path::new("/hq/workspace/world/peers/alex/manifest")
        );
    }

    #[test]
    fn settings_overrides_relocate_inbox_and_threads() {
        let settings = Settings {
            inbox_dir: Some("mail".into()),
            thread_log_dir: Some("conversations".into()),
            ..Settings::default()
        };
        let p = HqPaths::new("/hq", &settings);
        assert_eq!(p.worker_inbox("w"), Path::new("/hq/mail/w"));
        assert_eq!(p.threads(), Path::new("/hq/conversations"));
    }
}
