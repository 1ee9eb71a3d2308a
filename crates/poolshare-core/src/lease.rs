//! Scoped handles that give their reference back on drop.

use crate::async_registry::AsyncRegistry;
use crate::key::PoolKey;
use crate::registry::Registry;
use crate::resource::PoolResource;
use crate::shared::ReleaseOutcome;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// One counted reference to a pooled resource from a [`Registry`].
///
/// Dropping the lease performs exactly one release.
pub struct PoolLease<R: PoolResource> {
    registry: Registry<R>,
    key: Option<PoolKey>,
    resource: Arc<R>,
}

impl<R: PoolResource> PoolLease<R> {
    pub(crate) fn new(registry: Registry<R>, key: PoolKey, resource: Arc<R>) -> Self {
        Self {
            registry,
            key: Some(key),
            resource,
        }
    }

    /// The key this lease was acquired for.
    pub fn key(&self) -> &str {
        self.key.as_ref().map_or("", PoolKey::as_str)
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    /// Release now and report what happened.
    pub fn release(mut self) -> ReleaseOutcome {
        match self.key.take() {
            Some(key) => self.registry.release_key(&key),
            None => ReleaseOutcome::Absent,
        }
    }
}

impl<R: PoolResource> Deref for PoolLease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: PoolResource> fmt::Debug for PoolLease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLease")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<R: PoolResource> Drop for PoolLease<R> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.release_key(&key);
        }
    }
}

/// One counted reference to a pooled resource from an [`AsyncRegistry`].
///
/// Prefer [`AsyncPoolLease::release`]. On drop the release runs inline when
/// the key's section is free. Otherwise it is spawned onto the current Tokio
/// runtime, or waited for when there is no runtime.
pub struct AsyncPoolLease<R: PoolResource> {
    registry: AsyncRegistry<R>,
    key: Option<PoolKey>,
    resource: Arc<R>,
}

impl<R: PoolResource> AsyncPoolLease<R> {
    pub(crate) fn new(registry: AsyncRegistry<R>, key: PoolKey, resource: Arc<R>) -> Self {
        Self {
            registry,
            key: Some(key),
            resource,
        }
    }

    pub fn key(&self) -> &str {
        self.key.as_ref().map_or("", PoolKey::as_str)
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    /// Release now, waiting for the key's section.
    pub async fn release(mut self) -> ReleaseOutcome {
        match self.key.take() {
            Some(key) => self.registry.release_key(&key).await,
            None => ReleaseOutcome::Absent,
        }
    }
}

impl<R: PoolResource> Deref for AsyncPoolLease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: PoolResource> fmt::Debug for AsyncPoolLease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncPoolLease")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<R: PoolResource> Drop for AsyncPoolLease<R> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };

        // A runtime that is shutting down drops spawned tasks unrun, so only
        // defer when the section is actually contended.
        let key = match self.registry.release_key_now(key) {
            Ok(_) => return,
            Err(key) => key,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = self.registry.clone();
                handle.spawn(async move {
                    registry.release_key(&key).await;
                });
            }
            Err(_) => {
                self.registry.release_key_blocking(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Conn {
        closed: Arc<AtomicBool>,
    }

    impl PoolResource for Conn {
        type CloseError = std::convert::Infallible;

        fn close(&self) -> Result<(), Self::CloseError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn conn(closed: &Arc<AtomicBool>) -> impl FnOnce() -> Result<Conn, String> {
        let closed = Arc::clone(closed);
        move || Ok(Conn { closed })
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let closed = Arc::new(AtomicBool::new(false));
        let registry = Registry::new();

        let lease = registry.acquire("db", conn(&closed)).unwrap();
        assert_eq!(lease.key(), "db");
        assert_eq!(registry.ref_count("db"), 1);

        drop(lease);
        assert!(closed.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_explicit_release_reports_outcome() {
        let closed = Arc::new(AtomicBool::new(false));
        let registry = Registry::new();

        let first = registry.acquire("db", conn(&closed)).unwrap();
        let second = registry.acquire("db", conn(&closed)).unwrap();
        assert!(Arc::ptr_eq(first.resource(), second.resource()));

        assert_eq!(first.release(), ReleaseOutcome::Retained { remaining: 1 });
        assert_eq!(second.release(), ReleaseOutcome::Closed);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_async_lease_drop_outside_runtime() {
        let closed = Arc::new(AtomicBool::new(false));
        let registry = AsyncRegistry::new();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let lease = runtime
            .block_on(registry.acquire("db", || {
                let closed = Arc::clone(&closed);
                async move { Ok::<_, String>(Conn { closed }) }
            }))
            .unwrap();
        drop(runtime);

        drop(lease);
        assert!(closed.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_async_lease_drop_inside_runtime() {
        let closed = Arc::new(AtomicBool::new(false));
        let registry = AsyncRegistry::new();

        let lease = registry
            .acquire("db", || {
                let closed = Arc::clone(&closed);
                async move { Ok::<_, String>(Conn { closed }) }
            })
            .await
            .unwrap();
        drop(lease);

        // The release runs on a spawned task.
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_async_lease_released_when_runtime_shuts_down() {
        let closed = Arc::new(AtomicBool::new(false));
        let registry = AsyncRegistry::new();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .unwrap();
        let (held_tx, held_rx) = std::sync::mpsc::channel();

        {
            let registry = registry.clone();
            let closed = Arc::clone(&closed);
            runtime.spawn(async move {
                let lease = registry
                    .acquire("db", move || async move { Ok::<_, String>(Conn { closed }) })
                    .await
                    .unwrap();
                held_tx.send(()).unwrap();
                futures::future::pending::<()>().await;
                drop(lease);
            });
        }

        held_rx.recv().unwrap();
        assert_eq!(registry.ref_count("db"), 1);

        // Shutdown drops the parked task, and with it the lease.
        drop(runtime);
        assert_eq!(registry.ref_count("db"), 0);
        assert!(closed.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }
}
