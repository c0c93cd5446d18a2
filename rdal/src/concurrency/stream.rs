//! Result streams connecting task executions to their observers.
//!
//! Cold executions deliver through a per-subscription channel wrapped by
//! [`TaskSubscription`]. Hot executions record emitted values and the terminal
//! outcome in a [`HotCache`], which any number of [`HotSubscription`]s replay and
//! then follow live, so every observer sees the same single execution.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::{RdalError, RdalResult};

/// Events delivered from a task execution to its subscription.
#[derive(Debug)]
pub(crate) enum TaskEvent<T> {
    /// A value emitted by the task body.
    Value(T),
    /// The task body returned successfully.
    Completed,
    /// The task body failed or its submission was rejected.
    Failed(RdalError),
}

pin_project! {
    /// Result stream of one cold task execution.
    ///
    /// Yields every emitted value in order, then ends on success or yields the
    /// failure as its last item. Dropping the subscription before the execution
    /// begins cancels that execution.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct TaskSubscription<T> {
        rx: UnboundedReceiver<TaskEvent<T>>,
        done: bool,
    }
}

impl<T> TaskSubscription<T> {
    pub(crate) fn new(rx: UnboundedReceiver<TaskEvent<T>>) -> Self {
        Self { rx, done: false }
    }

    /// Drains the subscription, discarding values, and returns the terminal outcome.
    pub async fn wait(mut self) -> RdalResult<()> {
        use futures::StreamExt;

        while let Some(item) = self.next().await {
            if let Err(err) = item {
                return Err(err);
            }
        }

        Ok(())
    }
}

impl<T> Stream for TaskSubscription<T> {
    type Item = RdalResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(TaskEvent::Value(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(TaskEvent::Failed(err))) => {
                *this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(TaskEvent::Completed)) | Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Recorded state of a hot execution: values emitted so far plus the terminal
/// outcome once known.
struct HotState<T> {
    values: Vec<T>,
    terminal: Option<RdalResult<()>>,
}

/// Multicast replay cache backing one hot task execution.
///
/// The execution writes values and its terminal outcome here exactly once;
/// subscribers replay the recorded prefix and are woken through a watch channel
/// when new state arrives. Writes after the terminal outcome are ignored.
pub(crate) struct HotCache<T> {
    state: Mutex<HotState<T>>,
    version: watch::Sender<u64>,
}

impl<T> HotCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(HotState {
                values: Vec::new(),
                terminal: None,
            }),
            version: watch::channel(0).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HotState<T>> {
        // The critical sections below never run user code, so a poisoned lock
        // still holds consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records an emitted value, unless the execution already terminated.
    pub(crate) fn push(&self, value: T) {
        {
            let mut state = self.lock();
            if state.terminal.is_some() {
                return;
            }
            state.values.push(value);
        }

        self.version.send_modify(|version| *version += 1);
    }

    /// Records the terminal outcome. Only the first call has an effect.
    pub(crate) fn complete(&self, outcome: RdalResult<()>) {
        {
            let mut state = self.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(outcome);
        }

        self.version.send_modify(|version| *version += 1);
    }

    /// Snapshot of the terminal outcome, if the execution already terminated.
    pub(crate) fn terminal(&self) -> Option<RdalResult<()>> {
        self.lock().terminal.clone()
    }

    /// Subscribes to state-change notifications.
    pub(crate) fn version_rx(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

impl<T> std::fmt::Debug for HotCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("HotCache")
            .field("buffered", &state.values.len())
            .field("terminated", &state.terminal.is_some())
            .finish()
    }
}

pin_project! {
    /// Result stream of a hot task execution.
    ///
    /// Replays the values cached so far, follows the execution live, then ends on
    /// success or yields the cached failure as its last item. Subscribers attaching
    /// after completion observe the full replay.
    #[must_use = "streams do nothing unless polled"]
    pub struct HotSubscription<T> {
        cache: Arc<HotCache<T>>,
        #[pin]
        version: WatchStream<u64>,
        pos: usize,
        done: bool,
    }
}

impl<T> HotSubscription<T> {
    pub(crate) fn new(cache: Arc<HotCache<T>>) -> Self {
        let version = WatchStream::new(cache.version_rx());

        Self {
            cache,
            version,
            pos: 0,
            done: false,
        }
    }
}

impl<T: Clone> Stream for HotSubscription<T> {
    type Item = RdalResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        loop {
            {
                let state = this.cache.lock();

                if *this.pos < state.values.len() {
                    let value = state.values[*this.pos].clone();
                    *this.pos += 1;

                    return Poll::Ready(Some(Ok(value)));
                }

                if let Some(terminal) = &state.terminal {
                    *this.done = true;

                    return match terminal {
                        Ok(()) => Poll::Ready(None),
                        Err(err) => Poll::Ready(Some(Err(err.clone()))),
                    };
                }
            }

            // Wait for the cache to change, then re-check under the lock.
            match this.version.as_mut().poll_next(cx) {
                Poll::Ready(Some(_)) => continue,
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T> std::fmt::Debug for HotSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotSubscription")
            .field("pos", &self.pos)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
