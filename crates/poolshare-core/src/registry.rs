//! Blocking registry for threads.
//!
//! Factories run on the calling thread while that key's section is locked.
//! Callers for the same key queue behind the creator and then share its
//! result; callers for other keys are unaffected.

use crate::config::RegistryConfig;
use crate::error::{ReleaseError, Result};
use crate::key::PoolKey;
use crate::lease::PoolLease;
use crate::resource::{PoolFactory, PoolResource};
use crate::shared::{ReleaseOutcome, Shared};
use crate::slots::{PendingCreation, SlotState};
use crate::stats::RegistrySnapshot;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Section<R> = Mutex<SlotState<R>>;

fn lock_section<R>(section: &Section<R>) -> MutexGuard<'_, SlotState<R>> {
    // A panicking factory poisons the section, but the slot is retired
    // before the guard drops, so the state is still coherent.
    section.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reference-counted registry of shared pools, keyed by descriptor.
///
/// Cloning the handle shares the same registry.
pub struct Registry<R: PoolResource> {
    shared: Arc<Shared<Section<R>>>,
}

impl<R: PoolResource> Clone for Registry<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: PoolResource> Default for Registry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: PoolResource> std::fmt::Debug for Registry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.shared.config.name)
            .field("active_keys", &self.len())
            .finish_non_exhaustive()
    }
}

impl<R: PoolResource> Registry<R> {
    /// Create an empty registry with default configuration.
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
    /// Every successful call must be paired with one [`Registry::release`].
    /// The factory is only invoked when no entry exists; a factory error is
    /// returned untouched and leaves no trace in the registry.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Result<Arc<R>, F::Error>
    where
        F: PoolFactory<R>,
    {
        let key = self.shared.parse_key(key)?;
        self.get_or_create_key(&key, factory)
    }

    /// Like [`Registry::get_or_create`], but the reference is released when
    /// the returned lease is dropped.
    pub fn acquire<F>(&self, key: &str, factory: F) -> Result<PoolLease<R>, F::Error>
    where
        F: PoolFactory<R>,
    {
        let key = self.shared.parse_key(key)?;
        let resource = self.get_or_create_key(&key, factory)?;
        Ok(PoolLease::new(self.clone(), key, resource))
    }

    fn get_or_create_key<F>(&self, key: &PoolKey, factory: F) -> Result<Arc<R>, F::Error>
    where
        F: PoolFactory<R>,
    {
        let shared = &*self.shared;
        loop {
            let slot = shared.slots.checkout(key, Default::default);
            let mut state = lock_section(&slot.section);

            // Closed or abandoned while we waited; resolve the key again.
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

            let mut pending = PendingCreation::new(&shared.slots, &slot, key, state);
            return match factory.create() {
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
    pub fn release(&self, key: &str) -> ReleaseOutcome {
        match PoolKey::parse(key, self.shared.config.max_key_len) {
            Ok(key) => self.release_key(&key),
            Err(_) => self.shared.ignored_release("<invalid key>"),
        }
    }

    /// Like [`Registry::release`], but a release without a live entry is an error.
    pub fn try_release(&self, key: &str) -> std::result::Result<ReleaseOutcome, ReleaseError> {
        self.release(key).strict(|| self.shared.describe(key))
    }

    pub(crate) fn release_key(&self, key: &PoolKey) -> ReleaseOutcome {
        let shared = &*self.shared;
        let Some(slot) = shared.slots.lookup(key.as_str()) else {
            return shared.ignored_release(key.redacted());
        };

        let state = lock_section(&slot.section);
        shared.release_locked(key, &slot, state)
    }

    /// Outstanding references for `key`; 0 when absent.
    ///
    /// Never waits on an in-flight creation.
    pub fn ref_count(&self, key: &str) -> usize {
        self.shared.ref_count(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ref_count(key) > 0
    }

    /// Number of keys with a live entry.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys with a live entry, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.shared.keys()
    }

    pub fn stats(&self) -> RegistrySnapshot {
        self.shared.snapshot()
    }
}
