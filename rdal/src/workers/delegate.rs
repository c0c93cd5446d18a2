//! Scheduling engine with pre-shutdown hook orchestration.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::concurrency::shutdown::{Closeable, ShutdownHandle};
use crate::config::WorkerConfig;
use crate::error::RdalResult;
use crate::task::Task;
use crate::workers::single::{ColdTaskHandle, HotTaskHandle, SingleWorker};
use crate::{bail, error::ErrorKind, rdal_error};

/// Scheduling engine with pre-shutdown hook orchestration.
///
/// [`WorkerDelegate`] offers the same cold/hot scheduling primitives as
/// [`SingleWorker`] and adds a registry of closeable children that are shut down,
/// in registration order, before the delegate's own final cleanup task is
/// reported. It is the building block for bus-level objects that own a dynamic
/// set of session-scoped participants.
///
/// Once the final shutdown task has begun running, any new non-final submission
/// is rejected; tasks already queued earlier still complete. This closes the race
/// window between "shutdown decided" and "queue actually closed", so work racing
/// in after shutdown neither vanishes silently nor corrupts shutdown ordering.
pub struct WorkerDelegate {
    worker: SingleWorker,
    shutdown_called: AtomicBool,
    final_task_started: Arc<AtomicBool>,
    hooks: Mutex<Vec<Arc<dyn Closeable>>>,
}

impl WorkerDelegate {
    /// Creates a delegate on top of an existing worker.
    ///
    /// The delegate takes over shutting the worker down; callers should stop
    /// invoking [`SingleWorker::shutdown`] on it directly.
    pub fn new(worker: SingleWorker) -> Self {
        Self {
            worker,
            shutdown_called: AtomicBool::new(false),
            final_task_started: Arc::new(AtomicBool::new(false)),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns a dedicated worker and wraps it in a delegate.
    pub fn spawn(config: WorkerConfig) -> Self {
        Self::new(SingleWorker::spawn(config))
    }

    /// Schedules a task lazily, guarded against submissions racing with shutdown.
    ///
    /// Same contract as [`SingleWorker::schedule_cold`]; in addition, every
    /// subscription made after the final shutdown task started fails with
    /// [`ErrorKind::RejectedSubmission`].
    pub fn schedule_cold<T>(&self, task: Task<T>, is_final_task: bool) -> ColdTaskHandle<T>
    where
        T: Send + 'static,
    {
        self.worker.schedule_cold(self.guarded(task, is_final_task))
    }

    /// Schedules a task eagerly, guarded against submissions racing with shutdown.
    ///
    /// Same contract as [`SingleWorker::schedule_hot`]; in addition, submissions
    /// after the final shutdown task started fail with
    /// [`ErrorKind::RejectedSubmission`].
    pub fn schedule_hot<T>(&self, task: Task<T>, is_final_task: bool) -> HotTaskHandle<T>
    where
        T: Send + 'static,
    {
        if !is_final_task && self.final_task_started.load(Ordering::SeqCst) {
            return HotTaskHandle::ready(Err(rdal_error!(
                ErrorKind::RejectedSubmission,
                "Task submitted after the final shutdown task started"
            )));
        }

        self.worker.schedule_hot(self.guarded(task, is_final_task))
    }

    /// Registers a closeable child to be shut down before this delegate's own
    /// final cleanup task.
    ///
    /// Hooks run in registration order; registering the same hook twice (by
    /// identity) collapses to one registration. Fails with
    /// [`ErrorKind::InvalidState`] once shutdown has been initiated.
    pub fn add_pre_shutdown_hook(&self, hook: Arc<dyn Closeable>) -> RdalResult<()> {
        let mut hooks = lock(&self.hooks);

        // Checked under the same lock the shutdown path uses to snapshot the
        // registry, which closes the race with a concurrently starting shutdown.
        if self.shutdown_called.load(Ordering::SeqCst) {
            bail!(
                ErrorKind::InvalidState,
                "Pre-shutdown hooks cannot be registered once shutdown has been initiated"
            );
        }

        if hooks.iter().any(|registered| Arc::ptr_eq(registered, &hook)) {
            debug!("pre-shutdown hook already registered, skipping");

            return Ok(());
        }

        hooks.push(hook);

        Ok(())
    }

    /// Shuts down every registered hook, then this delegate's worker.
    ///
    /// Idempotent; the first caller wins and subsequent calls report immediate
    /// success. Hook shutdowns are invoked eagerly in registration order, and the
    /// final task plus queue termination are scheduled eagerly as well; only the
    /// reporting order is fixed. The combined outcome favors the worker stage's
    /// failure (which itself ranks the final task's failure highest) over any
    /// hook failure; among hooks, the first failure in registration order wins.
    pub fn shutdown(&self, final_task: Task<()>, timeout: Option<Duration>) -> ShutdownHandle {
        if self
            .shutdown_called
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("delegate already shut down, shutdown is a no-op");

            return ShutdownHandle::ready(Ok(()));
        }

        // The flag is already set, so registrations racing with this snapshot
        // either land in it or fail their in-lock flag check.
        let hooks: Vec<Arc<dyn Closeable>> = lock(&self.hooks).clone();

        info!(hooks = hooks.len(), "shutting down worker delegate");

        // Hooks begin shutting down now, in registration order. Their own
        // cleanup work typically lands on this delegate's queue ahead of the
        // final task scheduled below.
        let hook_handles: Vec<ShutdownHandle> =
            hooks.iter().map(|hook| hook.shutdown()).collect();

        let worker_shutdown = self
            .worker
            .shutdown(self.guarded(final_task, true), timeout);

        ShutdownHandle::new(async move {
            let mut hook_failure = None;
            for handle in hook_handles {
                if let Err(err) = handle.await {
                    hook_failure.get_or_insert(err);
                }
            }

            match worker_shutdown.await {
                // The caller's own cleanup is most proximate to what they asked
                // for, so its failure outranks hook failures.
                Err(err) => Err(err),
                Ok(()) => match hook_failure {
                    Some(err) => Err(err),
                    None => Ok(()),
                },
            }
        })
    }

    /// Wraps a task so the final task flips the rejection guard when it begins,
    /// and non-final tasks re-check the guard at execution time.
    fn guarded<T>(&self, task: Task<T>, is_final_task: bool) -> Task<T>
    where
        T: Send + 'static,
    {
        let flag = self.final_task_started.clone();

        Task::new(move |emitter| {
            let task = task.clone();
            let flag = flag.clone();

            async move {
                if is_final_task {
                    flag.store(true, Ordering::SeqCst);
                } else if flag.load(Ordering::SeqCst) {
                    bail!(
                        ErrorKind::RejectedSubmission,
                        "Task submitted after the final shutdown task started"
                    );
                }

                task.invoke(emitter).await
            }
        })
    }
}

impl fmt::Debug for WorkerDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerDelegate")
            .field("worker", &self.worker)
            .field("shutdown_called", &self.shutdown_called)
            .field("final_task_started", &self.final_task_started)
            .field("hooks", &lock(&self.hooks).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded sections never run user code, so a poisoned lock still holds
    // consistent state.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
