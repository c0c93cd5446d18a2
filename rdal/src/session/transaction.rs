//! Transaction lifecycle scheduling.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RdalResult;
use crate::task::Task;
use crate::workers::single::{HotTaskHandle, SingleWorker};

/// Customization point for a transacted session's commit and rollback.
///
/// Implementations must not invoke these methods themselves; they are only ever
/// called by the scheduling wrappers in [`TransactionLifecycle`], on the owning
/// worker's execution context.
#[async_trait]
pub trait TransactionBehavior: Send + Sync + 'static {
    /// Makes the transaction's effects durable.
    async fn do_commit(&self) -> RdalResult<()>;

    /// Discards the transaction's effects.
    async fn do_rollback(&self) -> RdalResult<()>;
}

/// Schedules commit and rollback on the session's worker.
///
/// Because commit and rollback run on the same serial execution context as every
/// read and write issued against the session, no operation can observe a partial
/// effect of either. Correctness is inherited entirely from the worker's
/// one-task-at-a-time guarantee; no further concurrency control exists here.
pub struct TransactionLifecycle<B> {
    worker: SingleWorker,
    behavior: Arc<B>,
}

impl<B> TransactionLifecycle<B>
where
    B: TransactionBehavior,
{
    /// Associates `behavior` with the session's worker.
    pub fn new(worker: SingleWorker, behavior: B) -> Self {
        Self {
            worker,
            behavior: Arc::new(behavior),
        }
    }

    /// Returns the wrapped behavior.
    pub fn behavior(&self) -> &Arc<B> {
        &self.behavior
    }

    /// Schedules the commit as a hot task on the session's worker.
    pub fn commit(&self) -> HotTaskHandle<()> {
        let behavior = self.behavior.clone();

        self.worker.schedule_hot(Task::unit(move || {
            let behavior = behavior.clone();
            async move { behavior.do_commit().await }
        }))
    }

    /// Schedules the rollback as a hot task on the session's worker.
    pub fn rollback(&self) -> HotTaskHandle<()> {
        let behavior = self.behavior.clone();

        self.worker.schedule_hot(Task::unit(move || {
            let behavior = behavior.clone();
            async move { behavior.do_rollback().await }
        }))
    }
}

impl<B> fmt::Debug for TransactionLifecycle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLifecycle")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
