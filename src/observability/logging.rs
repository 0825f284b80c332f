//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. JSON output is the default for
//! deployments; `pretty` is meant for local runs.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogFormat, ObservabilityConfig};
use crate::core::types::RequestContext;

/// Default filter when neither `RUST_LOG` nor a configured level is usable
const DEFAULT_DIRECTIVES: &str = "edge_control_plane=info,tower_http=info";

fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directives = match level.to_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => {
            format!("edge_control_plane={},tower_http=info", level)
        }
        _ => DEFAULT_DIRECTIVES.to_string(),
    };
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber
///
/// Installing twice (tests, embedding) is tolerated and only logged.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = build_filter(&config.log_level);

    let result = match config.log_format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return;
    }

    info!(
        level = %config.log_level,
        format = ?config.log_format,
        "Structured logging initialized"
    );
}

/// Span carrying the request's correlation id, tenant and region
pub fn request_span(ctx: &RequestContext, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        correlation_id = %ctx.correlation_id,
        tenant = ctx.tenant_id.as_deref().unwrap_or("-"),
        region = ctx.region.as_deref().unwrap_or("-"),
        method = %method,
        path = %path,
    )
}
