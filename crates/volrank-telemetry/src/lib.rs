//! Observability for volrank.
//!
//! - Structured logging with tracing (pretty in development, JSON in production)
//! - Prometheus collectors behind the [`Metrics`] facade
//! - Trade latency sampling with periodic min/mean/max reports

pub mod error;
pub mod latency;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use latency::{LatencyMonitor, LatencyStats};
pub use logging::init_logging;
pub use metrics::Metrics;
