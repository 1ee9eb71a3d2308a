//! Per-key sections and the map that hands them out.
//!
//! The map lock is held only long enough to look up, insert or unlink a slot.
//! All create/increment/decrement/close decisions happen under the slot's own
//! section lock, so unrelated keys never wait on each other.
//!
//! Lock order: a caller may take the map lock while holding a section lock
//! (to unlink), but never waits on a section while holding the map lock.

use crate::entry::{Decrement, PoolEntry};
use crate::key::PoolKey;
use std::collections::HashMap;
use std::ops::DerefMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// State guarded by a key's section lock.
#[derive(Debug)]
pub(crate) struct SlotState<R> {
    entry: Option<PoolEntry<R>>,
    /// Set once this slot has been unlinked; waiters must re-resolve the key.
    retired: bool,
}

impl<R> Default for SlotState<R> {
    fn default() -> Self {
        Self {
            entry: None,
            retired: false,
        }
    }
}

/// Result of releasing one reference under the section lock.
pub(crate) enum Released<R> {
    /// Nothing was held for this slot.
    Absent,
    Retained(usize),
    /// Last reference gone; the slot is retired and the resource must be closed.
    Drained(Arc<R>),
}

impl<R> SlotState<R> {
    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.entry.as_ref().map_or(0, PoolEntry::ref_count)
    }

    /// Join the live entry, if there is one.
    pub(crate) fn join(&mut self) -> Option<Arc<R>> {
        self.entry.as_mut().map(PoolEntry::increment)
    }

    /// Store a freshly created resource with its creator as the only holder.
    pub(crate) fn install(&mut self, resource: R) -> Arc<R> {
        let entry = PoolEntry::new(resource);
        let shared = Arc::clone(entry.resource());
        self.entry = Some(entry);
        shared
    }

    pub(crate) fn release(&mut self) -> Released<R> {
        let Some(entry) = self.entry.take() else {
            return Released::Absent;
        };

        match entry.decrement() {
            Decrement::Retained(entry) => {
                let remaining = entry.ref_count();
                self.entry = Some(entry);
                Released::Retained(remaining)
            }
            Decrement::Drained(resource) => {
                self.retired = true;
                Released::Drained(resource)
            }
        }
    }
}

/// Section state that can be abandoned when a creation does not finish.
pub(crate) trait Retire {
    fn retire(&mut self);
}

impl<R> Retire for SlotState<R> {
    fn retire(&mut self) {
        self.entry = None;
        self.retired = true;
    }
}

/// A key's section lock plus a lock-free mirror of its reference count.
pub(crate) struct Slot<L> {
    pub(crate) section: L,
    refs: AtomicUsize,
}

impl<L> Slot<L> {
    fn new(section: L) -> Self {
        Self {
            section,
            refs: AtomicUsize::new(0),
        }
    }

    /// Mirror the count for readers that must not wait on the section.
    ///
    /// Only call while holding the section lock.
    pub(crate) fn publish(&self, refs: usize) {
        self.refs.store(refs, Ordering::Release);
    }

    pub(crate) fn published_refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

/// Concurrent key → slot map.
pub(crate) struct SlotMap<L> {
    slots: Mutex<HashMap<String, Arc<Slot<L>>>>,
}

impl<L> Default for SlotMap<L> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<L> SlotMap<L> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot<L>>>> {
        // The map is only mutated by single insert/remove calls.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the slot for `key`, inserting an empty one if none exists.
    pub(crate) fn checkout(&self, key: &PoolKey, make: impl FnOnce() -> L) -> Arc<Slot<L>> {
        let mut slots = self.lock();
        Arc::clone(
            slots
                .entry(key.as_str().to_string())
                .or_insert_with(|| Arc::new(Slot::new(make()))),
        )
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<Arc<Slot<L>>> {
        self.lock().get(key).cloned()
    }

    /// Remove `slot` from the map, unless the key already points elsewhere.
    pub(crate) fn unlink(&self, key: &PoolKey, slot: &Arc<Slot<L>>) -> bool {
        let mut slots = self.lock();
        match slots.get(key.as_str()) {
            Some(current) if Arc::ptr_eq(current, slot) => {
                slots.remove(key.as_str());
                true
            }
            _ => false,
        }
    }

    /// Snapshot of (key, published count) for slots holding a live entry.
    pub(crate) fn live(&self) -> Vec<(String, usize)> {
        self.lock()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.published_refs()))
            .filter(|(_, refs)| *refs > 0)
            .collect()
    }
}

/// A creation in progress, holding the key's section lock.
///
/// If it is dropped without [`PendingCreation::finish`] (factory panic or a
/// cancelled future) the slot is retired and unlinked, so no half-built entry
/// stays visible.
pub(crate) struct PendingCreation<'a, L, G>
where
    G: DerefMut,
    G::Target: Retire,
{
    slots: &'a SlotMap<L>,
    slot: &'a Arc<Slot<L>>,
    key: &'a PoolKey,
    guard: G,
    armed: bool,
}

impl<'a, L, G> PendingCreation<'a, L, G>
where
    G: DerefMut,
    G::Target: Retire,
{
    pub(crate) fn new(
        slots: &'a SlotMap<L>,
        slot: &'a Arc<Slot<L>>,
        key: &'a PoolKey,
        guard: G,
    ) -> Self {
        Self {
            slots,
            slot,
            key,
            guard,
            armed: true,
        }
    }

    pub(crate) fn state(&mut self) -> &mut G::Target {
        &mut self.guard
    }

    /// Keep whatever was installed and release the section.
    pub(crate) fn finish(mut self) {
        self.armed = false;
    }

    /// Retire and unlink the slot after a factory error. The caller reports
    /// the error itself, so nothing is logged here.
    pub(crate) fn abandon(mut self) {
        self.retire();
        self.armed = false;
    }

    fn retire(&mut self) {
        self.guard.retire();
        self.slot.publish(0);
        self.slots.unlink(self.key, self.slot);
    }
}

impl<L, G> Drop for PendingCreation<'_, L, G>
where
    G: DerefMut,
    G::Target: Retire,
{
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "Pool creation for {} was interrupted; discarding partial entry",
                self.key
            );
            self.retire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestSection = Mutex<SlotState<u32>>;

    fn key(raw: &str) -> PoolKey {
        PoolKey::new(raw).unwrap()
    }

    #[test]
    fn test_checkout_reuses_slot() {
        let map: SlotMap<TestSection> = SlotMap::default();
        let a = map.checkout(&key("a"), Default::default);
        let b = map.checkout(&key("a"), Default::default);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(map.lookup("a").is_some());
        assert!(map.lookup("b").is_none());
    }

    #[test]
    fn test_unlink_only_removes_same_slot() {
        let map: SlotMap<TestSection> = SlotMap::default();
        let k = key("a");
        let old = map.checkout(&k, Default::default);
        assert!(map.unlink(&k, &old));

        let new = map.checkout(&k, Default::default);
        assert!(!map.unlink(&k, &old));
        assert!(Arc::ptr_eq(&map.lookup("a").unwrap(), &new));
    }

    #[test]
    fn test_state_release_cycle() {
        let mut state = SlotState::default();
        assert!(matches!(state.release(), Released::Absent));

        let first = state.install(5u32);
        let second = state.join().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(state.ref_count(), 2);

        assert!(matches!(state.release(), Released::Retained(1)));
        assert!(!state.is_retired());
        assert!(matches!(state.release(), Released::Drained(_)));
        assert!(state.is_retired());
        assert!(state.join().is_none());
        assert!(matches!(state.release(), Released::Absent));
    }

    #[test]
    fn test_abandoned_creation_unlinks_slot() {
        let map: SlotMap<TestSection> = SlotMap::default();
        let k = key("a");
        let slot = map.checkout(&k, Default::default);
        let guard = slot.section.lock().unwrap();
        PendingCreation::new(&map, &slot, &k, guard).abandon();
        assert!(map.lookup("a").is_none());
    }

    #[test]
    fn test_dropped_creation_unlinks_slot() {
        let map: SlotMap<TestSection> = SlotMap::default();
        let k = key("a");
        let slot = map.checkout(&k, Default::default);
        {
            let guard = slot.section.lock().unwrap();
            let _pending = PendingCreation::new(&map, &slot, &k, guard);
        }
        assert!(map.lookup("a").is_none());
        assert!(slot.section.lock().unwrap().is_retired());
    }

    #[test]
    fn test_finished_creation_keeps_slot() {
        let map: SlotMap<TestSection> = SlotMap::default();
        let k = key("a");
        let slot = map.checkout(&k, Default::default);
        {
            let guard = slot.section.lock().unwrap();
            let mut pending = PendingCreation::new(&map, &slot, &k, guard);
            pending.state().install(1);
            slot.publish(pending.state().ref_count());
            pending.finish();
        }
        assert!(map.lookup("a").is_some());
        assert_eq!(map.live(), vec![("a".to_string(), 1)]);
    }
}
