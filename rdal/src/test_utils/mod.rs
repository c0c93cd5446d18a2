//! Test helpers for exercising workers, delegates, and lifecycles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;

use crate::concurrency::shutdown::{Closeable, ShutdownHandle};
use crate::error::{ErrorKind, RdalResult};
use crate::rdal_error;
use crate::session::participant::ParticipantBehavior;

/// Initializes tracing for tests, once per process.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Chronological log of shutdown events shared between test closeables.
pub type ShutdownLog = Arc<Mutex<Vec<String>>>;

/// Creates an empty shared shutdown log.
pub fn new_shutdown_log() -> ShutdownLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Returns a snapshot of the log entries recorded so far.
pub fn log_entries(log: &ShutdownLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Closeable that records its shutdown invocation and completion in a shared log.
///
/// Records `<label>:called` synchronously when `shutdown` is invoked and
/// `<label>:done` when the returned handle's work completes, optionally after a
/// delay and optionally failing with a configured error kind.
pub struct RecordingCloseable {
    label: &'static str,
    log: ShutdownLog,
    delay: Duration,
    failure: Option<ErrorKind>,
    calls: AtomicUsize,
}

impl RecordingCloseable {
    /// Creates a closeable that succeeds immediately.
    pub fn new(label: &'static str, log: ShutdownLog) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            delay: Duration::ZERO,
            failure: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Creates a closeable that succeeds after `delay`.
    pub fn with_delay(label: &'static str, log: ShutdownLog, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            delay,
            failure: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Creates a closeable that fails with the given kind.
    pub fn failing(label: &'static str, log: ShutdownLog, kind: ErrorKind) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            delay: Duration::ZERO,
            failure: Some(kind),
            calls: AtomicUsize::new(0),
        })
    }

    /// Returns how many times `shutdown` has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Closeable for RecordingCloseable {
    fn shutdown(&self) -> ShutdownHandle {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:called", self.label));

        let label = self.label;
        let log = self.log.clone();
        let delay = self.delay;
        let failure = self.failure;

        ShutdownHandle::new(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            log.lock().unwrap().push(format!("{label}:done"));

            match failure {
                Some(kind) => Err(rdal_error!(kind, "Recording closeable failed on purpose")),
                None => Ok(()),
            }
        })
    }
}

/// Participant behavior counting how many times its cleanup ran.
pub struct CountingBehavior {
    calls: Arc<AtomicUsize>,
}

impl CountingBehavior {
    /// Creates a behavior reporting its cleanup runs through `calls`.
    pub fn new(calls: Arc<AtomicUsize>) -> Self {
        Self { calls }
    }
}

#[async_trait]
impl ParticipantBehavior for CountingBehavior {
    async fn do_shutdown(&self) -> RdalResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}
