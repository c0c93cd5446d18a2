//! Concurrency utilities for the session task-scheduling layer.
//!
//! This module provides the primitives the worker layer is built on: result
//! streams connecting task executions to their observers, and the shutdown
//! coordination surface shared by workers, sessions, and aggregates.
//!
//! # Coordination Patterns
//!
//! ## Result Delivery
//!
//! The [`stream`] module implements the two delivery modes of the crate:
//! per-subscription channels for cold executions (each subscription observes its
//! own run) and a multicast replay cache for hot executions (every observer sees
//! the same single run, regardless of when it attaches).
//!
//! ## Graceful Shutdown
//!
//! The [`shutdown`] module defines the [`shutdown::Closeable`] extension point
//! and the aggregate fan-out used to tear down trees of dependent resources:
//! 1. Every child begins shutting down eagerly, without waiting for observation
//! 2. Completions are joined in a fixed reporting order
//! 3. Failures never merge; the highest-priority failure wins

pub mod shutdown;
pub mod stream;
