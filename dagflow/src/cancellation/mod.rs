//! Cooperative cancellation for pipeline runs.
//!
//! A run owns one [`CancellationToken`]; it fires when a node using the
//! fail-pipeline strategy fails, and every in-flight node task observes it.

mod token;

pub use token::{CancelCallback, CancellationToken};
