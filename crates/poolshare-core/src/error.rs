//! Error types for the pool registry.
//!
//! The registry has a deliberately small error surface: a key can be rejected
//! before anything happens, or the caller's factory can fail. Capacity and
//! health problems belong to the pooled resource, not to this layer.

use thiserror::Error;

/// Error returned by `get_or_create` and `acquire`.
///
/// `E` is the factory's own error type, carried through untouched.
#[derive(Debug, Error)]
pub enum PoolError<E> {
    #[error("Invalid pool key: {reason}")]
    InvalidKey { reason: String },

    #[error("Pool creation failed for {key}: {source}")]
    Creation {
        /// Log-safe rendering of the key.
        key: String,
        #[source]
        source: E,
    },
}

/// Result type alias for registry operations.
pub type Result<T, E> = std::result::Result<T, PoolError<E>>;

impl<E> PoolError<E> {
    pub(crate) fn invalid_key(reason: impl Into<String>) -> Self {
        PoolError::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Check if the key was rejected before any work was done.
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, PoolError::InvalidKey { .. })
    }

    /// Check if the caller's factory failed.
    pub fn is_creation_failure(&self) -> bool {
        matches!(self, PoolError::Creation { .. })
    }

    /// Take back the factory's original error, if that is what failed.
    pub fn into_creation_error(self) -> Option<E> {
        match self {
            PoolError::Creation { source, .. } => Some(source),
            PoolError::InvalidKey { .. } => None,
        }
    }
}

/// Error returned by the strict `try_release` variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseError {
    #[error("Release of {key} without a matching acquire")]
    NotAcquired { key: String },
}
