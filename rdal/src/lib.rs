pub mod concurrency;
pub mod config;
pub mod error;
mod macros;
pub mod session;
pub mod task;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod workers;
