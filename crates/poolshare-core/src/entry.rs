//! One live pool instance and its outstanding-reference count.

use std::sync::Arc;

/// What a decrement left behind.
#[derive(Debug)]
pub(crate) enum Decrement<R> {
    /// Other holders remain; the entry lives on.
    Retained(PoolEntry<R>),
    /// The last holder let go; the resource is handed back for closing.
    Drained(Arc<R>),
}

/// A resource plus the number of callers currently holding it.
///
/// Only ever touched while the owning key's section is locked, so the count
/// and the resource always change together.
#[derive(Debug)]
pub(crate) struct PoolEntry<R> {
    resource: Arc<R>,
    ref_count: usize,
}

impl<R> PoolEntry<R> {
    /// Wrap a freshly created resource, counting its creator as the first holder.
    pub(crate) fn new(resource: R) -> Self {
        Self {
            resource: Arc::new(resource),
            ref_count: 1,
        }
    }

    pub(crate) fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Register another holder and hand out the shared resource.
    pub(crate) fn increment(&mut self) -> Arc<R> {
        self.ref_count += 1;
        Arc::clone(&self.resource)
    }

    /// Drop one holder. Consumes the entry once nobody is left.
    pub(crate) fn decrement(mut self) -> Decrement<R> {
        self.ref_count = self.ref_count.saturating_sub(1);
        if self.ref_count == 0 {
            Decrement::Drained(self.resource)
        } else {
            Decrement::Retained(self)
        }
    }
}
