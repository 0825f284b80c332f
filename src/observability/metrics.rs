//! # Metrics
//!
//! Counter names emitted through the `metrics` facade, and the optional Prometheus
//! recorder that renders them at `GET /metrics`.
//!
//! Components call the `metrics::counter!` macros directly; when no recorder is
//! installed (tests, `metrics_enabled: false`) the calls are no-ops.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Route loads by outcome (`success`, `stale`, `empty`)
pub const ROUTE_LOADS: &str = "control_plane_route_loads_total";

/// Route rows skipped during a load (no target or malformed)
pub const ROUTES_SKIPPED: &str = "control_plane_routes_skipped_total";

pub const ROUTE_CACHE_INVALIDATIONS: &str = "control_plane_route_cache_invalidations_total";

/// Failures recorded against the active region
pub const REGION_FAILURES: &str = "control_plane_region_failures_total";

/// Region transitions by trigger (`automatic`, `operator`, `restore`)
pub const REGION_FAILOVERS: &str = "control_plane_region_failovers_total";

/// Preflight cache lookups by result (`hit`, `miss`)
pub const PREFLIGHT_CACHE: &str = "control_plane_preflight_cache_total";

pub const PREFLIGHT_REJECTIONS: &str = "control_plane_preflight_rejections_total";

/// Version preference resolutions by result (`hit`, `miss`, `no_tenant`, `store_error`)
pub const VERSION_PREFERENCE: &str = "control_plane_version_preference_total";

/// Proxied requests by outcome (`success`, `upstream_error`, `transport_error`, `timeout`)
pub const UPSTREAM_REQUESTS: &str = "control_plane_upstream_requests_total";

/// Errors that can occur while installing the exporter
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to initialize metrics exporter: {0}")]
    InitializationError(String),
}

/// Install the Prometheus recorder and return the handle used to render it
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    PrometheusBuilder::new()
        .add_global_label("service", "edge-control-plane")
        .install_recorder()
        .map_err(|e| MetricsError::InitializationError(e.to_string()))
}
