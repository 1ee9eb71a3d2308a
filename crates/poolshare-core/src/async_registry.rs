//! Async registry for Tokio tasks.
//!
//! Same protocol as [`crate::Registry`], with the per-key section held by a
//! `tokio::sync::Mutex` so a slow factory parks waiting tasks instead of
//! blocking worker threads. Dropping a `get_or_create` future mid-creation
//! discards the partial entry.

use crate::config::RegistryConfig;
use crate::error::{ReleaseError, Result};
use crate::key::PoolKey;
use crate::lease::AsyncPoolLease;
use crate::resource::{AsyncPoolFactory, PoolResource};
use crate::shared::{ReleaseOutcome, Shared};
use crate::slots::{PendingCreation, SlotState};
use crate::stats::RegistrySnapshot;
use std::sync::Arc;
use tokio::sync::Mutex;

type Section<R> = Mutex<SlotState<R>>;

/// Async reference-counted registry of shared pools.
///
/// Cloning the handle shares the same registry.
pub struct AsyncRegistry<R: PoolResource> {
    shared: Arc<Shared<Section<R>>>,
}

impl<R: PoolResource> Clone for AsyncRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: PoolResource> Default for AsyncRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: PoolResource> std::fmt::Debug for AsyncRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRegistry")
            .field("name", &self.shared.config.name)
            .field("active_keys", &self.len())
            .finish_non_exhaustive()
    }
}

impl<R: PoolResource> AsyncRegistry<R> {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Return the live resource for `key`, creating it with `factory` if
    /// there is none.
    ///
    /// Tasks asking for the same key while the factory runs wait for it and
    /// share the result. Pair every success with one [`AsyncRegistry::release`].
    pub async fn get_or_create<F>(&self, key: &str, factory: F) -> Result<Arc<R>, F::Error>
    where
        F: AsyncPoolFactory<R>,
    {
        let key = self.shared.parse_key(key)?;
        self.get_or_create_key(&key, factory).await
    }

    /// Like [`AsyncRegistry::get_or_create`], returning a lease that releases
    /// its reference when dropped.
    pub async fn acquire<F>(&self, key: &str, factory: F) -> Result<AsyncPoolLease<R>, F::Error>
    where
        F: AsyncPoolFactory<R>,
    {
        let key = self.shared.parse_key(key)?;
        let resource = self.get_or_create_key(&key, factory).await?;
        Ok(AsyncPoolLease::new(self.clone(), key, resource))
    }

    async fn get_or_create_key<F>(&self, key: &PoolKey, factory: F) -> Result<Arc<R>, F::Error>
    where
        F: AsyncPoolFactory<R>,
    {
        let shared = &*self.shared;
        loop {
            let slot = shared.slots.checkout(key, Default::default);
            let mut state = slot.section.lock().await;

            if state.is_retired() {
                continue;
            }

            if let Some(resource) = state.join() {
                let refs = state.ref_count();
                slot.publish(refs);
                drop(state);
                shared.joined(key, refs);
                return Ok(resource);
            }

            // Cancelling this future from here on drops `pending`, which
            // retires the slot.
            let mut pending = PendingCreation::new(&shared.slots, &slot, key, state);
            return match factory.create().await {
                Ok(resource) => {
                    let resource = pending.state().install(resource);
                    slot.publish(1);
                    pending.finish();
                    shared.created(key);
                    Ok(resource)
                }
                Err(e) => {
                    pending.abandon();
                    Err(shared.creation_failed(key, e))
                }
            };
        }
    }

    /// Drop one reference to `key`, closing the resource on the last one.
    ///
    /// Unknown, invalid, or already released keys are a no-op.
    pub async fn release(&self, key: &str) -> ReleaseOutcome {
        match PoolKey::parse(key, self.shared.config.max_key_len) {
            Ok(key) => self.release_key(&key).await,
            Err(_) => self.shared.ignored_release("<invalid key>"),
        }
    }

    /// Like [`AsyncRegistry::release`], but a release without a live entry is an error.
    pub async fn try_release(
        &self,
        key: &str,
    ) -> std::result::Result<ReleaseOutcome, ReleaseError> {
        self.release(key).await.strict(|| self.shared.describe(key))
    }

    pub(crate) async fn release_key(&self, key: &PoolKey) -> ReleaseOutcome {
        let shared = &*self.shared;
        let Some(slot) = shared.slots.lookup(key.as_str()) else {
            return shared.ignored_release(key.redacted());
        };

        let state = slot.section.lock().await;
        shared.release_locked(key, &slot, state)
    }

    /// Release without waiting on the key's section.
    ///
    /// Hands the key back when the section is busy, so the caller can defer
    /// the release instead of blocking.
    pub(crate) fn release_key_now(
        &self,
        key: PoolKey,
    ) -> std::result::Result<ReleaseOutcome, PoolKey> {
        let shared = &*self.shared;
        let Some(slot) = shared.slots.lookup(key.as_str()) else {
            return Ok(shared.ignored_release(key.redacted()));
        };

        let Ok(state) = slot.section.try_lock() else {
            return Err(key);
        };
        Ok(shared.release_locked(&key, &slot, state))
    }

    /// Release from synchronous code. Must not be called from within a runtime.
    pub(crate) fn release_key_blocking(&self, key: &PoolKey) -> ReleaseOutcome {
        let shared = &*self.shared;
        let Some(slot) = shared.slots.lookup(key.as_str()) else {
            return shared.ignored_release(key.redacted());
        };

        let state = slot.section.blocking_lock();
        shared.release_locked(key, &slot, state)
    }

    /// Outstanding references for `key`; 0 when absent.
    pub fn ref_count(&self, key: &str) -> usize {
        self.shared.ref_count(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ref_count(key) > 0
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.shared.keys()
    }

    pub fn stats(&self) -> RegistrySnapshot {
        self.shared.snapshot()
    }
}
