//! Prometheus metrics and structured logging for the tick recorder.
//!
//! - Prometheus counters for frames, ticks and reconnects
//! - Structured logging with tracing (pretty or JSON)
//! - Periodic statistics summary

pub mod error;
pub mod logging;
pub mod metrics;
pub mod stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use stats::{StatsReporter, StatsSnapshot};
