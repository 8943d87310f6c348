// SPDX-License-Identifier: MIT OR Apache-2.0
//! Small string-keyed TTL maps for channel resolvers.
//!
//! Resolver cardinality is bounded by operator-configured peers × contexts,
//! so a hand-rolled map with per-entry expiry beats a general-purpose LRU.
//! The lock is held only for a single map operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default TTL for resolver cache entries (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A string-keyed cache whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (V, Instant)>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache with the given time-to-live.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create a cache with [`DEFAULT_TTL`].
    #[must_use]
    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    /// Fetch a live entry; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut map = self.entries.lock().expect("ttl cache lock poisoned");
        match map.get(key) {
            Some((value, inserted)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an entry, restarting its TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let mut map = self.entries.lock().expect("ttl cache lock poisoned");
        map.insert(key.into(), (value, Instant::now()));
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &str) {
        let mut map = self.entries.lock().expect("ttl cache lock poisoned");
        map.remove(key);
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut map = self.entries.lock().expect("ttl cache lock poisoned");
        let before = map.len();
        map.retain(|_, (_, inserted)| inserted.elapsed() < self.ttl);
        before - map.len()
    }

    /// Current entry count, live and expired-but-unswept alike.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("ttl cache lock poisoned").len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything the background sweeper can expire.
pub trait Sweepable: Send + Sync {
    /// Drop expired entries; returns how many were removed.
    fn sweep_expired(&self) -> usize;
    /// Label for logging.
    fn label(&self) -> &str;
}

/// A labelled [`TtlCache`] that the sweeper task can own.
pub struct NamedCache<V> {
    label: String,
    cache: TtlCache<V>,
}

impl<V: Clone> NamedCache<V> {
    /// Wrap a cache with a sweeper-visible label.
    #[must_use]
    pub fn new(label: impl Into<String>, ttl: Duration) -> Self {
        Self {
            label: label.into(),
            cache: TtlCache::new(ttl),
        }
    }

    /// Access the underlying cache.
    #[must_use]
    pub fn cache(&self) -> &TtlCache<V> {
        &self.cache
    }
}

impl<V: Clone + Send + Sync> Sweepable for NamedCache<V> {
    fn sweep_expired(&self) -> usize {
        self.cache.sweep()
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Spawn the background sweeper over a set of caches.
///
/// Returns the task handle; aborting it stops sweeping.
pub fn spawn_sweeper(
    caches: Vec<Arc<dyn Sweepable>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for cache in &caches {
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!(cache = cache.label(), removed, "swept expired entries");
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_within_ttl() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(60));
        cache.insert("ENG", "team-uuid".to_string());
        assert_eq!(cache.get("ENG").as_deref(), Some("team-uuid"));
    }

    #[test]
    fn expired_entries_vanish_on_access() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::ZERO);
        cache.insert("k", 1);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_restarts_the_ttl() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_removes_a_single_key() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn sweep_reports_removed_count() {
        let live: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        live.insert("a", 1);
        assert_eq!(live.sweep(), 0);

        let dead: TtlCache<u32> = TtlCache::new(Duration::ZERO);
        dead.insert("a", 1);
        dead.insert("b", 2);
        assert_eq!(dead.sweep(), 2);
        assert!(dead.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_expires_entries_over_time() {
        // TTL zero: everything is expired the moment the sweeper looks.
        let named: Arc<NamedCache<u32>> = Arc::new(NamedCache::new("context", Duration::ZERO));
        named.cache().insert("hq-cloud", 7);
        let handle = spawn_sweeper(vec![named.clone()], Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(named.cache().is_empty());
        handle.abort();
    }
}
