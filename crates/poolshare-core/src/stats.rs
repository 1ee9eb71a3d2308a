//! Lifetime counters for a registry.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by registry operations.
#[derive(Debug, Default)]
pub(crate) struct RegistryStats {
    creations: AtomicU64,
    creation_failures: AtomicU64,
    joins: AtomicU64,
    releases: AtomicU64,
    ignored_releases: AtomicU64,
    closes: AtomicU64,
    close_failures: AtomicU64,
}

impl RegistryStats {
    pub(crate) fn record_creation(&self) {
        self.creations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_creation_failure(&self) {
        self.creation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ignored_release(&self) {
        self.ignored_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self, ok: bool) {
        self.closes.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.close_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, name: &str, active_keys: usize) -> RegistrySnapshot {
        RegistrySnapshot {
            name: name.to_string(),
            active_keys,
            creations: self.creations.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            ignored_releases: self.ignored_releases.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a registry's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub name: String,
    /// Keys currently holding a live entry.
    pub active_keys: usize,
    /// Successful factory invocations.
    pub creations: u64,
    pub creation_failures: u64,
    /// Acquisitions that reused a live entry.
    pub joins: u64,
    /// Releases that decremented a live entry.
    pub releases: u64,
    /// Releases for keys with no live entry.
    pub ignored_releases: u64,
    /// Resources closed (including failed closes).
    pub closes: u64,
    pub close_failures: u64,
}

impl RegistrySnapshot {
    /// References currently handed out across all keys.
    pub fn outstanding(&self) -> u64 {
        (self.creations + self.joins).saturating_sub(self.releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = RegistryStats::default();
        stats.record_creation();
        stats.record_join();
        stats.record_join();
        stats.record_release();
        stats.record_ignored_release();
        stats.record_close(false);

        let snapshot = stats.snapshot("test", 1);
        assert_eq!(snapshot.name, "test");
        assert_eq!(snapshot.active_keys, 1);
        assert_eq!(snapshot.creations, 1);
        assert_eq!(snapshot.joins, 2);
        assert_eq!(snapshot.releases, 1);
        assert_eq!(snapshot.ignored_releases, 1);
        assert_eq!(snapshot.closes, 1);
        assert_eq!(snapshot.close_failures, 1);
        assert_eq!(snapshot.outstanding(), 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = RegistryStats::default().snapshot("main", 0);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["name"], "main");
        assert_eq!(json["creations"], 0);
    }
}
