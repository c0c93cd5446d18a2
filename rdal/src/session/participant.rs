//! Lifecycle glue for session-scoped objects.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::concurrency::shutdown::{Closeable, ShutdownHandle};
use crate::error::RdalResult;
use crate::task::Task;
use crate::workers::single::{HotTaskHandle, SingleWorker};

/// Customization point for a session-scoped object's shutdown.
///
/// Implementations must not invoke `do_shutdown` themselves; it is only ever
/// called by the scheduling wrapper in [`Participant::shutdown`], on the owning
/// worker's execution context.
#[async_trait]
pub trait ParticipantBehavior: Send + Sync + 'static {
    /// Cleanup run as the participant's shutdown task. The default does nothing.
    async fn do_shutdown(&self) -> RdalResult<()> {
        Ok(())
    }
}

/// Couples one worker with one business object and gives it a uniform
/// asynchronous shutdown.
///
/// The association is fixed at construction and never reassigned. The
/// participant implements [`Closeable`], so it can be registered as a
/// pre-shutdown hook on a worker delegate.
pub struct Participant<B> {
    worker: SingleWorker,
    behavior: Arc<B>,
    shutdown_called: AtomicBool,
}

impl<B> Participant<B>
where
    B: ParticipantBehavior,
{
    /// Associates `behavior` with its owning worker.
    pub fn new(worker: SingleWorker, behavior: B) -> Self {
        Self {
            worker,
            behavior: Arc::new(behavior),
            shutdown_called: AtomicBool::new(false),
        }
    }

    /// Returns the worker owning this participant's work.
    pub fn worker(&self) -> &SingleWorker {
        &self.worker
    }

    /// Returns the wrapped behavior.
    pub fn behavior(&self) -> &Arc<B> {
        &self.behavior
    }

    /// Schedules the behavior's cleanup as a hot task on the owning worker.
    ///
    /// Only the first call schedules anything; repeated calls report immediate
    /// success without re-running the cleanup.
    pub fn shutdown(&self) -> HotTaskHandle<()> {
        if self
            .shutdown_called
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("participant already shut down, shutdown is a no-op");

            return HotTaskHandle::ready(Ok(()));
        }

        let behavior = self.behavior.clone();

        self.worker.schedule_hot(Task::unit(move || {
            let behavior = behavior.clone();
            async move { behavior.do_shutdown().await }
        }))
    }
}

impl<B> Closeable for Participant<B>
where
    B: ParticipantBehavior,
{
    fn shutdown(&self) -> ShutdownHandle {
        let handle = Participant::shutdown(self);

        ShutdownHandle::new(async move { handle.wait().await })
    }
}

impl<B> fmt::Debug for Participant<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("worker", &self.worker)
            .field("shutdown_called", &self.shutdown_called)
            .finish_non_exhaustive()
    }
}
