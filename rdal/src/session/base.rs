//! Sessions: ordering classification, capability dispatch, and lifecycle.

use std::fmt;
use std::sync::Arc;

use crate::concurrency::shutdown::{Closeable, ShutdownHandle};
use crate::error::RdalResult;
use crate::session::participant::{Participant, ParticipantBehavior};
use crate::workers::single::{HotTaskHandle, SingleWorker};
use crate::{bail, error::ErrorKind};

/// Sequencing guarantees a session offers its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ordering {
    /// No sequencing guarantees between operations.
    Unordered,
    /// Operations are observed in submission order.
    Ordered,
    /// Operations participate in an explicit transaction.
    Transacted,
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ordering::Unordered => "unordered",
            Ordering::Ordered => "ordered",
            Ordering::Transacted => "transacted",
        };

        f.write_str(name)
    }
}

/// Explicit capability set of a session or resource.
///
/// Capabilities are queried before dispatch, so an unsupported operation is
/// detected up front and reported as [`ErrorKind::UnsupportedOperation`] rather
/// than failing somewhere inside the attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    unordered: bool,
    ordered: bool,
    transacted: bool,
    writes: bool,
}

impl Capabilities {
    /// Creates an empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the given ordering as supported.
    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        match ordering {
            Ordering::Unordered => self.unordered = true,
            Ordering::Ordered => self.ordered = true,
            Ordering::Transacted => self.transacted = true,
        }

        self
    }

    /// Marks write operations as supported.
    pub fn with_writes(mut self) -> Self {
        self.writes = true;

        self
    }

    /// Returns whether the given ordering is supported.
    pub fn supports_ordering(&self, ordering: Ordering) -> bool {
        match ordering {
            Ordering::Unordered => self.unordered,
            Ordering::Ordered => self.ordered,
            Ordering::Transacted => self.transacted,
        }
    }

    /// Returns whether write operations are supported.
    pub fn supports_writes(&self) -> bool {
        self.writes
    }

    /// Fails with [`ErrorKind::UnsupportedOperation`] unless `ordering` is supported.
    pub fn ensure_ordering(&self, ordering: Ordering) -> RdalResult<()> {
        if !self.supports_ordering(ordering) {
            bail!(
                ErrorKind::UnsupportedOperation,
                "Session ordering is not supported",
                ordering
            );
        }

        Ok(())
    }

    /// Fails with [`ErrorKind::UnsupportedOperation`] unless writes are supported.
    pub fn ensure_writes(&self) -> RdalResult<()> {
        if !self.writes {
            bail!(
                ErrorKind::UnsupportedOperation,
                "Write operations are not supported"
            );
        }

        Ok(())
    }
}

/// A session: one worker, one behavior, a fixed [`Ordering`] classification,
/// and an explicit [`Capabilities`] set.
///
/// All of a session's reads, writes, and lifecycle operations serialize on its
/// worker, so business logic never races itself.
pub struct Session<B> {
    participant: Participant<B>,
    ordering: Ordering,
    capabilities: Capabilities,
}

impl<B> Session<B>
where
    B: ParticipantBehavior,
{
    /// Creates a session with the given classification.
    ///
    /// Fails with [`ErrorKind::UnsupportedOperation`] when `ordering` is not
    /// within `capabilities`.
    pub fn new(
        worker: SingleWorker,
        behavior: B,
        ordering: Ordering,
        capabilities: Capabilities,
    ) -> RdalResult<Self> {
        capabilities.ensure_ordering(ordering)?;

        Ok(Self {
            participant: Participant::new(worker, behavior),
            ordering,
            capabilities,
        })
    }

    /// Returns this session's fixed ordering classification.
    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    /// Returns this session's capability set.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Returns the worker owning this session's work.
    pub fn worker(&self) -> &SingleWorker {
        self.participant.worker()
    }

    /// Returns the wrapped behavior.
    pub fn behavior(&self) -> &Arc<B> {
        self.participant.behavior()
    }

    /// Schedules the session's cleanup as a hot task on its worker.
    ///
    /// See [`Participant::shutdown`] for the exactly-once contract.
    pub fn shutdown(&self) -> HotTaskHandle<()> {
        self.participant.shutdown()
    }
}

impl<B> Closeable for Session<B>
where
    B: ParticipantBehavior,
{
    fn shutdown(&self) -> ShutdownHandle {
        Closeable::shutdown(&self.participant)
    }
}

impl<B> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("participant", &self.participant)
            .field("ordering", &self.ordering)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
