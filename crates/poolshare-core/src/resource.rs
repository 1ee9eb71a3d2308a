//! Capabilities the registry needs from callers.
//!
//! The registry never looks inside a pooled resource. It needs exactly two
//! things: a way to build one ([`PoolFactory`] / [`AsyncPoolFactory`]) and a
//! way to shut one down ([`PoolResource::close`]).

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;

/// A shareable resource with a close capability.
pub trait PoolResource: Send + Sync + 'static {
    type CloseError: Display;

    /// Shut the resource down.
    ///
    /// Called exactly once, when the last outstanding reference is released.
    fn close(&self) -> Result<(), Self::CloseError>;
}

/// Builds a resource for a key that has no live entry.
///
/// Any `FnOnce() -> Result<R, E>` closure is a factory.
pub trait PoolFactory<R> {
    type Error;

    fn create(self) -> Result<R, Self::Error>;
}

impl<R, E, F> PoolFactory<R> for F
where
    F: FnOnce() -> Result<R, E>,
{
    type Error = E;

    fn create(self) -> Result<R, E> {
        self()
    }
}

/// Async counterpart of [`PoolFactory`].
///
/// Any `FnOnce() -> impl Future<Output = Result<R, E>>` closure is a factory.
/// Dropping the registry future while `create` runs cancels the creation.
#[async_trait]
pub trait AsyncPoolFactory<R>: Send {
    type Error: Send;

    async fn create(self) -> Result<R, Self::Error>;
}

#[async_trait]
impl<R, E, F, Fut> AsyncPoolFactory<R> for F
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    type Error = E;

    async fn create(self) -> Result<R, E> {
        self().await
    }
}
