//! Logging setup.
//!
//! The engine logs through `tracing` with one span per run and per node.
//! Lifecycle events go to an [`EventSink`](crate::events::EventSink);
//! [`LoggingEventSink`](crate::events::LoggingEventSink) routes them back
//! into the log.

mod logging;

pub use logging::init_logging;
