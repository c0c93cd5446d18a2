//! Worker implementations for session task scheduling.

pub mod delegate;
pub mod single;

pub use delegate::WorkerDelegate;
pub use single::{ColdTaskHandle, HotTaskHandle, SingleWorker};
