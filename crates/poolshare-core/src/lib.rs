//! Poolshare - reference-counted registry for sharing pools across callers.
//!
//! Expensive, stateful resources such as database connection pools are
//! created once per key (usually a connection descriptor) and shared by every
//! caller asking for the same key. Each acquisition bumps a reference count;
//! the resource is closed when the last holder releases it.
//!
//! Guarantees:
//! - At most one factory call per key while an entry is live, no matter how
//!   many callers race for it.
//! - Locking is per key: a slow factory only delays callers of that key.
//! - A failed, panicking, or cancelled creation leaves nothing behind.
//! - Each created resource is closed exactly once, after its count hits zero.
//!
//! # Example
//!
//! ```
//! use poolshare::{PoolResource, Registry, ReleaseOutcome};
//!
//! struct PgPool;
//!
//! impl PoolResource for PgPool {
//!     type CloseError = std::convert::Infallible;
//!
//!     fn close(&self) -> Result<(), Self::CloseError> {
//!         Ok(())
//!     }
//! }
//!
//! let registry = Registry::new();
//! let a = registry.get_or_create("postgres://db/orders", || Ok::<_, String>(PgPool)).unwrap();
//! let b = registry.get_or_create("postgres://db/orders", || Ok::<_, String>(PgPool)).unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b));
//!
//! registry.release("postgres://db/orders");
//! assert_eq!(registry.release("postgres://db/orders"), ReleaseOutcome::Closed);
//! assert!(registry.is_empty());
//! ```

pub mod async_registry;
pub mod config;
pub mod error;
pub mod key;
pub mod lease;
pub mod registry;
pub mod resource;
pub mod stats;

mod entry;
mod shared;
mod slots;

pub use async_registry::AsyncRegistry;
pub use config::{KeyLimits, RegistryConfig};
pub use error::{PoolError, ReleaseError, Result};
pub use key::{InvalidKey, PoolKey};
pub use lease::{AsyncPoolLease, PoolLease};
pub use registry::Registry;
pub use resource::{AsyncPoolFactory, PoolFactory, PoolResource};
pub use shared::ReleaseOutcome;
pub use stats::RegistrySnapshot;
