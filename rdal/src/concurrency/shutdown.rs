//! Shutdown coordination primitives shared by workers, sessions, and aggregates.
//!
//! [`Closeable`] is the sole lifecycle extension point of this crate: anything
//! exposing an asynchronous `shutdown()` can be registered as a pre-shutdown hook
//! on a worker delegate or fanned out through [`shutdown_all`]. [`ShutdownHandle`]
//! is the uniform observation handle for an in-flight shutdown.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::RdalResult;

/// A component that can be shut down asynchronously.
///
/// Implementations start their shutdown work eagerly when `shutdown` is invoked
/// and report the outcome through the returned handle. A caller that drops the
/// handle forfeits the outcome; the shutdown itself still runs.
pub trait Closeable: Send + Sync {
    /// Initiates shutdown and returns a handle observing its outcome.
    fn shutdown(&self) -> ShutdownHandle;
}

/// Observation handle for an in-flight shutdown.
#[must_use = "futures do nothing unless polled or awaited"]
pub struct ShutdownHandle {
    inner: BoxFuture<'static, RdalResult<()>>,
}

impl ShutdownHandle {
    /// Wraps a future resolving to the shutdown outcome.
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = RdalResult<()>> + Send + 'static,
    {
        Self { inner: fut.boxed() }
    }

    /// Creates a handle that resolves immediately with the given outcome.
    pub fn ready(outcome: RdalResult<()>) -> Self {
        Self::new(std::future::ready(outcome))
    }
}

impl Future for ShutdownHandle {
    type Output = RdalResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle").finish_non_exhaustive()
    }
}

/// Shuts down a collection of children and joins their outcomes.
///
/// Every child's `shutdown()` is invoked immediately, before the returned handle
/// is polled. The handle completes successfully only once every child completed
/// successfully, and fails with the first failure encountered in iteration order.
/// Children after a failing one keep shutting down; their outcomes are simply not
/// observed.
pub fn shutdown_all<'a, I>(children: I) -> ShutdownHandle
where
    I: IntoIterator<Item = &'a dyn Closeable>,
{
    let handles: Vec<ShutdownHandle> = children.into_iter().map(Closeable::shutdown).collect();

    ShutdownHandle::new(async move {
        for (index, handle) in handles.into_iter().enumerate() {
            if let Err(err) = handle.await {
                debug!(child = index, error = %err, "child shutdown failed");

                return Err(err);
            }
        }

        Ok(())
    })
}

/// Blocks the calling thread until the shutdown handle resolves.
///
/// Converts the asynchronous result into a synchronous return-or-error for call
/// sites that must block, e.g. teardown paths outside any async context.
pub fn await_completion(handle: ShutdownHandle) -> RdalResult<()> {
    futures::executor::block_on(handle)
}
