//! Serial task executor owning one dedicated execution context per session.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::concurrency::shutdown::ShutdownHandle;
use crate::concurrency::stream::{HotCache, HotSubscription, TaskEvent, TaskSubscription};
use crate::config::WorkerConfig;
use crate::error::{ErrorKind, RdalResult};
use crate::rdal_error;
use crate::task::{Emitter, Task};

/// A unit of work enqueued on a worker's serial execution context.
pub(crate) type WorkItem = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// State shared between a worker, its handles, and its execution context.
#[derive(Debug)]
pub(crate) struct WorkerShared {
    id: Uuid,
    name: String,
    queue: Mutex<Option<UnboundedSender<WorkItem>>>,
    stopped: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerShared {
    /// Enqueues a work item, failing once the queue has been closed by shutdown.
    pub(crate) fn submit(&self, item: WorkItem) -> RdalResult<()> {
        let queue = lock(&self.queue);
        let Some(tx) = queue.as_ref() else {
            return Err(rejected_submission());
        };

        if tx.send(item).is_err() {
            return Err(rejected_submission());
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded sections never run user code, so a poisoned lock still holds
    // consistent state.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn rejected_submission() -> crate::error::RdalError {
    rdal_error!(
        ErrorKind::RejectedSubmission,
        "Task submitted to a terminating worker"
    )
}

/// Serial task executor owning one dedicated execution context.
///
/// [`SingleWorker`] runs every task belonging to one session on a single spawned
/// loop draining a FIFO queue, awaiting each task body to completion before the
/// next starts. At most one task body executes at any instant, and bodies run in
/// submission order, which is what lets session business logic stay lock-free.
///
/// The worker is cheaply cloneable; clones share the same execution context.
#[derive(Debug, Clone)]
pub struct SingleWorker {
    shared: Arc<WorkerShared>,
}

impl SingleWorker {
    /// Spawns the worker's execution context and returns the worker.
    pub fn spawn(config: WorkerConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();
        let id = Uuid::new_v4();

        let span = info_span!("worker", worker_id = %id, worker_name = %config.name);
        let loop_handle = tokio::spawn(
            async move {
                while let Some(item) = rx.recv().await {
                    item().await;
                }

                debug!("worker execution context drained and terminated");
            }
            .instrument(span),
        );

        info!(worker_id = %id, worker_name = %config.name, "spawned worker execution context");

        Self {
            shared: Arc::new(WorkerShared {
                id,
                name: config.name,
                queue: Mutex::new(Some(tx)),
                stopped: AtomicBool::new(false),
                loop_handle: Mutex::new(Some(loop_handle)),
            }),
        }
    }

    /// Returns the unique id of this worker.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Returns the configured name of this worker.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns whether shutdown has been requested on this worker.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Schedules a task lazily.
    ///
    /// Nothing executes until the returned handle is subscribed; each subscription
    /// enqueues a fresh, independent execution of the task body.
    pub fn schedule_cold<T>(&self, task: Task<T>) -> ColdTaskHandle<T>
    where
        T: Send + 'static,
    {
        ColdTaskHandle {
            task,
            shared: self.shared.clone(),
        }
    }

    /// Schedules a task eagerly.
    ///
    /// Exactly one execution is enqueued before this method returns; its emitted
    /// values and terminal outcome are cached and multicast to every observer of
    /// the returned handle. Failures of the eager execution are swallowed (logged
    /// at debug) and only surface to observers.
    pub fn schedule_hot<T>(&self, task: Task<T>) -> HotTaskHandle<T>
    where
        T: Send + 'static,
    {
        let cache = Arc::new(HotCache::new());
        let emitter = Emitter::cache(cache.clone());
        let completion = cache.clone();

        let item: WorkItem = Box::new(move || {
            async move {
                let outcome = run_task(task, emitter).await;
                if let Err(err) = &outcome {
                    // Eager executions swallow failures; observers read them
                    // from the cache.
                    debug!(error = %err, "hot-scheduled task failed");
                }

                completion.complete(outcome);
            }
            .boxed()
        });

        if let Err(err) = self.shared.submit(item) {
            cache.complete(Err(err));
        }

        HotTaskHandle { cache }
    }

    /// Begins consuming an externally composed result chain on this worker's
    /// execution context, without blocking the caller.
    ///
    /// Chain failures are logged and swallowed; callers who care about the
    /// outcome must observe the chain through its own handle.
    pub fn subscribe_hot<F>(&self, chain: F) -> RdalResult<()>
    where
        F: Future<Output = RdalResult<()>> + Send + 'static,
    {
        self.shared.submit(Box::new(move || {
            async move {
                if let Err(err) = chain.await {
                    debug!(error = %err, "externally composed chain failed on worker");
                }
            }
            .boxed()
        }))
    }

    /// Shuts down this worker in two phases: run `final_task`, then terminate the
    /// execution context.
    ///
    /// Idempotent; the first caller wins. The final task is scheduled hot, then
    /// the queue is closed (already scheduled work still drains) and termination
    /// is awaited up to `timeout` (`None` waits forever). The reported outcome
    /// favors, in order: the final task's failure, a timeout failure, an
    /// interruption failure, success. Subsequent calls report immediate success.
    pub fn shutdown(&self, final_task: Task<()>, timeout: Option<Duration>) -> ShutdownHandle {
        if self
            .shared
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(worker_id = %self.shared.id, "worker already stopped, shutdown is a no-op");

            return ShutdownHandle::ready(Ok(()));
        }

        info!(worker_id = %self.shared.id, "shutting down worker");

        let final_handle = self.schedule_hot(final_task);

        // Termination request: closing the queue lets already scheduled work
        // drain and then stops the execution context.
        drop(lock(&self.shared.queue).take());
        let loop_handle = lock(&self.shared.loop_handle).take();

        ShutdownHandle::new(async move {
            let termination = await_termination(loop_handle, timeout).await;

            // The final task's failure is what the caller most wants to know
            // about, so it outranks the termination outcome.
            if let Some(Err(err)) = final_handle.outcome() {
                return Err(err);
            }

            termination
        })
    }
}

/// Awaits the loop task's termination, bounded by `timeout` when given.
async fn await_termination(
    loop_handle: Option<JoinHandle<()>>,
    timeout: Option<Duration>,
) -> RdalResult<()> {
    let Some(loop_handle) = loop_handle else {
        return Ok(());
    };

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, loop_handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(rdal_error!(
                    ErrorKind::ShutdownTimeout,
                    "Worker execution context did not terminate in time",
                    format!("waited {limit:?}")
                ));
            }
        },
        None => loop_handle.await,
    };

    match joined {
        Ok(()) => Ok(()),
        Err(err) if err.is_cancelled() => Err(rdal_error!(
            ErrorKind::ShutdownInterrupted,
            "Worker termination await was interrupted",
            source: err
        )),
        Err(err) => Err(rdal_error!(
            ErrorKind::WorkerPanic,
            "Worker execution context panicked",
            source: err
        )),
    }
}

/// Runs one task body, converting panics into failures.
async fn run_task<T>(task: Task<T>, emitter: Emitter<T>) -> RdalResult<()> {
    match AssertUnwindSafe(task.invoke(emitter)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(rdal_error!(
            ErrorKind::TaskPanic,
            "Task body panicked",
            panic_message(panic.as_ref())
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Lazy result handle for a cold-scheduled task.
///
/// Holding the handle costs nothing; execution happens per [`subscribe`] call.
///
/// [`subscribe`]: ColdTaskHandle::subscribe
#[derive(Debug)]
pub struct ColdTaskHandle<T> {
    task: Task<T>,
    shared: Arc<WorkerShared>,
}

impl<T> ColdTaskHandle<T>
where
    T: Send + 'static,
{
    /// Enqueues a fresh execution of the task and returns its result stream.
    ///
    /// Each call triggers an independent execution; two subscriptions never share
    /// emissions or outcomes. Subscribing after the worker started terminating
    /// yields a rejected-submission failure. Dropping the subscription before the
    /// execution begins cancels it.
    pub fn subscribe(&self) -> TaskSubscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Emitter::channel(tx.clone());
        let events = tx.clone();
        let task = self.task.clone();

        let item: WorkItem = Box::new(move || {
            async move {
                // A closed channel means the subscription was dropped before the
                // execution began; skip the body entirely.
                if events.is_closed() {
                    return;
                }

                let event = match run_task(task, emitter).await {
                    Ok(()) => TaskEvent::Completed,
                    Err(err) => TaskEvent::Failed(err),
                };
                let _ = events.send(event);
            }
            .boxed()
        });

        if let Err(err) = self.shared.submit(item) {
            let _ = tx.send(TaskEvent::Failed(err));
        }

        TaskSubscription::new(rx)
    }
}

/// Eagerly started, result-cached handle for a hot-scheduled task.
///
/// All observers, whether they attach before or after the execution completes,
/// see the same single execution's emissions and outcome.
pub struct HotTaskHandle<T> {
    cache: Arc<HotCache<T>>,
}

impl<T> HotTaskHandle<T> {
    /// Creates a handle whose outcome is already known, without any execution.
    pub(crate) fn ready(outcome: RdalResult<()>) -> Self {
        let cache = Arc::new(HotCache::new());
        cache.complete(outcome);

        Self { cache }
    }

    /// Replays the cached values, then follows the execution live.
    pub fn subscribe(&self) -> HotSubscription<T>
    where
        T: Clone,
    {
        HotSubscription::new(self.cache.clone())
    }

    /// Waits for the execution's terminal outcome.
    ///
    /// Can be awaited by any number of observers; all see the same outcome.
    pub async fn wait(&self) -> RdalResult<()> {
        let mut version = self.cache.version_rx();

        loop {
            if let Some(outcome) = self.cache.terminal() {
                return outcome;
            }

            // The cache outlives us through the shared Arc, so the sender side
            // cannot disappear before a terminal outcome is recorded.
            if version.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    /// Non-blocking snapshot of the terminal outcome, if already known.
    pub fn outcome(&self) -> Option<RdalResult<()>> {
        self.cache.terminal()
    }
}

impl<T> Clone for HotTaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<T> std::fmt::Debug for HotTaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotTaskHandle")
            .field("cache", &self.cache)
            .finish()
    }
}
