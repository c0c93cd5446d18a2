//! Session-level lifecycle: participants, sessions, and transactions.

pub mod base;
pub mod participant;
pub mod transaction;

pub use base::{Capabilities, Ordering, Session};
pub use participant::{Participant, ParticipantBehavior};
pub use transaction::{TransactionBehavior, TransactionLifecycle};
