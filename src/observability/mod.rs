// Structured logging
pub mod logging;

// Metric names and the Prometheus exporter
pub mod metrics;

pub use logging::{init_logging, request_span};
pub use metrics::install_prometheus;
