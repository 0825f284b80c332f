//! # HTTP Server Module
//!
//! Axum application serving the control plane:
//!
//! - `GET  /health`: liveness
//! - `GET  /metrics`: Prometheus rendering (when the recorder is installed)
//! - `GET  /admin/routes`: the currently cached route set
//! - `POST /admin/routes/refresh`: raise a route refresh signal
//! - `GET  /admin/region`, `POST /admin/region/failover`: region control
//! - everything else: run the [`EdgePipeline`] and forward through `reqwest`
//!
//! Upstream outcomes are always reported to the failover coordinator. If the handler
//! future is dropped before the upstream answered (client disconnect), an
//! [`OutcomeGuard`] records the failure from a detached task.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router as AxumRouter,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn, Instrument};

use super::pipeline::{is_hop_by_hop, EdgePipeline, PipelineDecision, UpstreamRequest};
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::{InboundRequest, RequestContext};
use crate::failover::{region_admin_router, FailoverOperator, UpstreamOutcome};
use crate::observability::metrics::UPSTREAM_REQUESTS;
use crate::observability::request_span;
use crate::routing::{RefreshSignal, UpstreamTarget};

/// Largest request body buffered before forwarding
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EdgePipeline>,

    /// Pooled upstream client
    pub client: reqwest::Client,

    pub upstream_timeout: Duration,

    /// Route refresh sender used by the admin endpoint
    pub refresh: RefreshSignal,

    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<EdgePipeline>,
        upstream_timeout: Duration,
        refresh: RefreshSignal,
        metrics: Option<PrometheusHandle>,
    ) -> ControlPlaneResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ControlPlaneError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            pipeline,
            client,
            upstream_timeout,
            refresh,
            metrics,
        })
    }
}

/// Build the application router
pub fn build_app(state: AppState, admin_enabled: bool) -> AxumRouter {
    let mut app = AxumRouter::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler));

    if admin_enabled {
        app = app
            .route("/admin/routes", get(list_routes))
            .route("/admin/routes/refresh", post(refresh_routes));
    }

    let mut app = app.fallback(proxy_handler).with_state(state.clone());

    if admin_enabled {
        let operator = FailoverOperator::new(Arc::clone(state.pipeline.coordinator()));
        app = app.merge(region_admin_router(operator));
    }

    app.layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until Ctrl-C or SIGTERM
pub async fn serve(app: AxumRouter, addr: SocketAddr) -> ControlPlaneResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ControlPlaneError::internal(format!("Failed to bind server to {}: {}", addr, e)))?;

    info!("🌐 Edge control plane listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ControlPlaneError::internal(format!("Server error: {}", e)))?;

    info!("🏁 Server stopped accepting connections");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("📡 Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "edge-control-plane"
    });

    (StatusCode::OK, Json(health_info))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

/// One entry of `GET /admin/routes`
#[derive(Debug, Serialize)]
pub struct RouteSummary {
    pub id: String,
    pub version: i64,
    pub path_pattern: Option<String>,

    /// Candidate upstream URIs; more than one for weighted routes
    pub targets: Vec<String>,

    pub weighted: bool,
    pub predicates: usize,
    pub filters: usize,
    pub attributes: BTreeMap<String, String>,
}

async fn list_routes(State(state): State<AppState>) -> Json<Vec<RouteSummary>> {
    let routes = state.pipeline.routes().list().await;
    let summaries = routes
        .iter()
        .map(|route| RouteSummary {
            id: route.id().to_string(),
            version: route.definition.version,
            path_pattern: route.definition.path_pattern.clone(),
            targets: route.target.uris().into_iter().map(str::to_string).collect(),
            weighted: matches!(route.target, UpstreamTarget::Weighted(_)),
            predicates: route.predicates.len(),
            filters: route.filters.len(),
            attributes: route.attributes.clone(),
        })
        .collect();
    Json(summaries)
}

async fn refresh_routes(State(state): State<AppState>) -> Response {
    if state.refresh.notify("admin") {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "refresh scheduled" })),
        )
            .into_response()
    } else {
        ControlPlaneError::internal("route refresh listener is not running").into_response()
    }
}

/// Fallback handler: run the pipeline and act on its decision
async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let inbound = InboundRequest::new(parts.method, path_and_query, parts.headers);

    let (ctx, decision) = state.pipeline.handle(&inbound).await;
    let span = request_span(&ctx, inbound.method.as_str(), &inbound.path);

    let mut response = match decision {
        PipelineDecision::Respond(preflight) => preflight.into_response(),
        PipelineDecision::Reject(e) => {
            span.in_scope(|| debug!(error = %e, "Request rejected"));
            e.into_response()
        }
        PipelineDecision::Proxy(upstream) => forward(&state, &ctx, upstream, body)
            .instrument(span)
            .await,
    };

    state.pipeline.tag_response(&ctx, response.headers_mut());
    response
}

async fn forward(
    state: &AppState,
    ctx: &RequestContext,
    upstream: UpstreamRequest,
    body: Body,
) -> Response {
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return ControlPlaneError::invalid_request("body", e.to_string()).into_response();
        }
    };

    debug!(
        route_id = %upstream.route_id,
        variant = ?upstream.variant_id,
        url = %upstream.url,
        "Forwarding request"
    );

    let guard = OutcomeGuard::new(Arc::clone(&state.pipeline), ctx.clone());
    let result = state
        .client
        .request(upstream.method, &upstream.url)
        .headers(upstream.headers)
        .timeout(state.upstream_timeout)
        .body(body)
        .send()
        .await;

    match result {
        Ok(upstream_response) => {
            let status = upstream_response.status();
            guard.complete(UpstreamOutcome::from_status(status.as_u16()));

            let headers = upstream_response.headers().clone();
            let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
            *response.status_mut() = status;
            for (name, value) in headers.iter() {
                if !is_hop_by_hop(name.as_str()) {
                    response.headers_mut().append(name.clone(), value.clone());
                }
            }
            response
        }
        Err(e) if e.is_timeout() => {
            guard.complete(UpstreamOutcome::TimedOut);
            warn!(url = %upstream.url, "Upstream timed out");
            ControlPlaneError::Timeout {
                timeout_ms: state.upstream_timeout.as_millis() as u64,
            }
            .into_response()
        }
        Err(e) => {
            guard.complete(UpstreamOutcome::TransportError(e.to_string()));
            warn!(url = %upstream.url, error = %e, "Upstream transport error");
            let mut response = ControlPlaneError::from(e).into_response();
            response
                .headers_mut()
                .insert("x-upstream-error", HeaderValue::from_static("transport"));
            response
        }
    }
}

/// Reports the upstream outcome exactly once, even if the request future is dropped
pub struct OutcomeGuard {
    pipeline: Arc<EdgePipeline>,
    ctx: RequestContext,
    reported: bool,
}

impl OutcomeGuard {
    pub fn new(pipeline: Arc<EdgePipeline>, ctx: RequestContext) -> Self {
        Self {
            pipeline,
            ctx,
            reported: false,
        }
    }

    pub fn complete(mut self, outcome: UpstreamOutcome) {
        self.reported = true;
        metrics::counter!(UPSTREAM_REQUESTS, "outcome" => outcome.label()).increment(1);
        self.pipeline.complete(&self.ctx, &outcome);
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if self.reported {
            return;
        }

        let outcome = UpstreamOutcome::TransportError("client disconnected".to_string());
        metrics::counter!(UPSTREAM_REQUESTS, "outcome" => outcome.label()).increment(1);

        let pipeline = Arc::clone(&self.pipeline);
        let ctx = self.ctx.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pipeline.complete(&ctx, &outcome);
                });
            }
            Err(_) => pipeline.complete(&ctx, &outcome),
        }
    }
}
