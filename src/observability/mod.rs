//! Logging setup and session metrics.

mod logging;
mod metrics;

pub use logging::{log_request, log_response, LogFormat, LogLevel, LoggingConfig};
pub use metrics::{
    InMemoryMetricsCollector, MetricsCollector, NoopMetricsCollector, SessionMetrics,
};
