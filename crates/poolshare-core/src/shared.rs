//! State and bookkeeping common to the blocking and async registries.

use crate::config::RegistryConfig;
use crate::error::{PoolError, ReleaseError};
use crate::key::PoolKey;
use crate::resource::PoolResource;
use crate::slots::{Released, Slot, SlotMap, SlotState};
use crate::stats::{RegistrySnapshot, RegistryStats};
use std::ops::DerefMut;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a release did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The entry is still held by `remaining` callers.
    Retained { remaining: usize },
    /// That was the last reference; the resource was closed and the key removed.
    Closed,
    /// No live entry for the key; nothing changed.
    Absent,
}

impl ReleaseOutcome {
    pub fn is_closed(&self) -> bool {
        matches!(self, ReleaseOutcome::Closed)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ReleaseOutcome::Absent)
    }

    /// Turn an unmatched release into an error for the strict variants.
    pub(crate) fn strict(self, key: impl FnOnce() -> String) -> Result<Self, ReleaseError> {
        match self {
            ReleaseOutcome::Absent => Err(ReleaseError::NotAcquired { key: key() }),
            outcome => Ok(outcome),
        }
    }
}

/// Config, slot map and counters behind a registry handle.
pub(crate) struct Shared<L> {
    pub(crate) config: RegistryConfig,
    pub(crate) slots: SlotMap<L>,
    pub(crate) stats: RegistryStats,
}

impl<L> Shared<L> {
    pub(crate) fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            slots: SlotMap::default(),
            stats: RegistryStats::default(),
        }
    }

    pub(crate) fn parse_key<E>(&self, raw: &str) -> Result<PoolKey, PoolError<E>> {
        PoolKey::parse(raw, self.config.max_key_len)
            .map_err(|e| PoolError::invalid_key(e.to_string()))
    }

    /// Log-safe label for a raw key that may not even parse.
    pub(crate) fn describe(&self, raw: &str) -> String {
        match PoolKey::parse(raw, self.config.max_key_len) {
            Ok(key) => key.redacted().to_string(),
            Err(_) => "<invalid key>".to_string(),
        }
    }

    pub(crate) fn joined(&self, key: &PoolKey, refs: usize) {
        self.stats.record_join();
        debug!(
            "Registry {}: reusing pool for {} ({} holders)",
            self.config.name, key, refs
        );
    }

    pub(crate) fn created(&self, key: &PoolKey) {
        self.stats.record_creation();
        info!("Registry {}: created pool for {}", self.config.name, key);
    }

    pub(crate) fn creation_failed<E>(&self, key: &PoolKey, source: E) -> PoolError<E> {
        self.stats.record_creation_failure();
        warn!(
            "Registry {}: pool creation failed for {}",
            self.config.name, key
        );
        PoolError::Creation {
            key: key.redacted().to_string(),
            source,
        }
    }

    /// Drop one reference under the section lock, then close outside it.
    pub(crate) fn release_locked<R, G>(
        &self,
        key: &PoolKey,
        slot: &Arc<Slot<L>>,
        mut state: G,
    ) -> ReleaseOutcome
    where
        R: PoolResource,
        G: DerefMut<Target = SlotState<R>>,
    {
        let released = state.release();
        slot.publish(state.ref_count());
        if matches!(released, Released::Drained(_)) {
            // Unlink before unlocking so waiters re-resolve to a fresh slot.
            self.slots.unlink(key, slot);
        }
        drop(state);

        self.settle(key, released)
    }

    fn settle<R: PoolResource>(
        &self,
        key: &PoolKey,
        released: Released<R>,
    ) -> ReleaseOutcome {
        match released {
            Released::Absent => self.ignored_release(key.redacted()),
            Released::Retained(remaining) => {
                self.stats.record_release();
                debug!(
                    "Registry {}: released {} ({} holders left)",
                    self.config.name, key, remaining
                );
                ReleaseOutcome::Retained { remaining }
            }
            Released::Drained(resource) => {
                self.stats.record_release();
                self.close(key, resource);
                ReleaseOutcome::Closed
            }
        }
    }

    pub(crate) fn ignored_release(&self, label: &str) -> ReleaseOutcome {
        self.stats.record_ignored_release();
        if self.config.strict_release {
            warn!(
                "Registry {}: release of {} without a live entry",
                self.config.name, label
            );
        } else {
            debug!(
                "Registry {}: ignoring release of {}, no live entry",
                self.config.name, label
            );
        }
        ReleaseOutcome::Absent
    }

    fn close<R: PoolResource>(&self, key: &PoolKey, resource: Arc<R>) {
        match resource.close() {
            Ok(()) => {
                self.stats.record_close(true);
                info!("Registry {}: closed pool for {}", self.config.name, key);
            }
            Err(e) => {
                self.stats.record_close(false);
                warn!(
                    "Registry {}: failed to close pool for {}: {}",
                    self.config.name, key, e
                );
            }
        }
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.slots.live().into_iter().map(|(key, _)| key).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.live().len()
    }

    pub(crate) fn ref_count(&self, key: &str) -> usize {
        self.slots
            .lookup(key)
            .map_or(0, |slot| slot.published_refs())
    }

    pub(crate) fn snapshot(&self) -> RegistrySnapshot {
        self.stats.snapshot(&self.config.name, self.len())
    }
}
