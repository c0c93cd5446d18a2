//! Units of work scheduled on a session worker.
//!
//! A [`Task`] is an async closure that may push zero or more values through an
//! [`Emitter`] before resolving with success or failure. Completion and failure
//! signaling towards result handles is performed by the scheduling layer once the
//! closure's future resolves; task bodies never signal terminally themselves.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc::UnboundedSender;

use crate::concurrency::stream::{HotCache, TaskEvent};
use crate::error::RdalResult;

/// Push side of a task's result stream.
///
/// [`Emitter`] decouples task bodies from the scheduling mode they run under: the
/// same body emits into a per-subscription channel when cold-scheduled and into
/// the shared multicast cache when hot-scheduled. Emissions after the consumer is
/// gone, or after the task has terminated, are silently dropped.
pub struct Emitter<T> {
    sink: EmitterSink<T>,
}

enum EmitterSink<T> {
    Channel(UnboundedSender<TaskEvent<T>>),
    Cache(Arc<HotCache<T>>),
}

impl<T> Emitter<T> {
    /// Creates an emitter feeding a single cold subscription.
    pub(crate) fn channel(events: UnboundedSender<TaskEvent<T>>) -> Self {
        Self {
            sink: EmitterSink::Channel(events),
        }
    }

    /// Creates an emitter feeding the multicast cache of a hot execution.
    pub(crate) fn cache(cache: Arc<HotCache<T>>) -> Self {
        Self {
            sink: EmitterSink::Cache(cache),
        }
    }

    /// Pushes a value to the consumers of this task execution.
    pub fn emit(&self, value: T) {
        match &self.sink {
            EmitterSink::Channel(events) => {
                // A closed channel means the subscription was dropped.
                let _ = events.send(TaskEvent::Value(value));
            }
            EmitterSink::Cache(cache) => cache.push(value),
        }
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        let sink = match &self.sink {
            EmitterSink::Channel(events) => EmitterSink::Channel(events.clone()),
            EmitterSink::Cache(cache) => EmitterSink::Cache(cache.clone()),
        };

        Self { sink }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.sink {
            EmitterSink::Channel(_) => "channel",
            EmitterSink::Cache(_) => "cache",
        };

        f.debug_struct("Emitter").field("sink", &mode).finish()
    }
}

/// A unit of work to be run on a worker's serial execution context.
///
/// [`Task`] wraps an async closure receiving an [`Emitter`] for the values it
/// produces. The wrapper is cheaply cloneable and re-invokable, which is what
/// allows cold scheduling to execute a fresh run per subscription.
pub struct Task<T> {
    run: Arc<dyn Fn(Emitter<T>) -> BoxFuture<'static, RdalResult<()>> + Send + Sync>,
}

impl<T> Task<T> {
    /// Creates a task from an async closure.
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RdalResult<()>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |emitter| run(emitter).boxed()),
        }
    }

    /// Creates a task that emits nothing and immediately succeeds.
    pub fn noop() -> Self {
        Self::new(|_emitter| async { Ok(()) })
    }

    /// Starts one execution of the task body.
    pub(crate) fn invoke(&self, emitter: Emitter<T>) -> BoxFuture<'static, RdalResult<()>> {
        (self.run)(emitter)
    }
}

impl Task<()> {
    /// Wraps a closure that emits nothing, for cleanup-style tasks.
    pub fn unit<F, Fut>(run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RdalResult<()>> + Send + 'static,
    {
        Self::new(move |_emitter| run())
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
