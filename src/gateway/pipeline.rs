//! # Edge Pipeline
//!
//! Runs the control plane stages for one request in a fixed order:
//!
//! 1. tag the request with the active region
//! 2. resolve the tenant's preferred API version
//! 3. answer CORS preflights (from the cache when possible)
//! 4. look up the route and build the upstream request
//!
//! The pipeline never performs the upstream call itself. The serving layer forwards the
//! [`UpstreamRequest`] and reports the outcome back through [`EdgePipeline::complete`].

use axum::http::{header, HeaderMap, Method};
use std::sync::Arc;
use tracing::debug;

use crate::core::config::ControlPlaneConfig;
use crate::core::error::ControlPlaneError;
use crate::core::types::{insert_header, InboundRequest, RequestContext};
use crate::cors::{PreflightHandler, PreflightResponse};
use crate::failover::{RegionFailoverCoordinator, UpstreamOutcome};
use crate::routing::{RouteMatch, RouteSource};
use crate::versioning::{rewrite_version_segment, VersionPreferenceResolver};

/// Connection-scoped headers that are never forwarded
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header is connection-scoped
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Header names the pipeline writes
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub region_header: String,
    pub tenant_header: String,
    pub version_header: String,

    /// Replace the version segment of the forwarded path with the preferred version
    pub rewrite_path: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &ControlPlaneConfig) -> Self {
        Self {
            region_header: config.failover.region_header.clone(),
            tenant_header: config.versioning.tenant_header.clone(),
            version_header: config.versioning.version_header.clone(),
            rewrite_path: config.versioning.rewrite_path,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&ControlPlaneConfig::default())
    }
}

/// A request ready to be forwarded
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub route_id: String,
    pub variant_id: Option<String>,
    pub method: Method,

    /// Absolute URL including the query string
    pub url: String,

    pub headers: HeaderMap,
}

/// What the serving layer should do with the request
#[derive(Debug)]
pub enum PipelineDecision {
    /// Answer directly (CORS preflight)
    Respond(PreflightResponse),

    /// Forward to the upstream
    Proxy(UpstreamRequest),

    /// Fail the request with this error
    Reject(ControlPlaneError),
}

/// The four control plane stages composed in request order
pub struct EdgePipeline {
    coordinator: Arc<RegionFailoverCoordinator>,
    versions: Arc<VersionPreferenceResolver>,
    preflight: Arc<PreflightHandler>,
    routes: Arc<RouteSource>,
    settings: PipelineSettings,
}

impl EdgePipeline {
    pub fn new(
        coordinator: Arc<RegionFailoverCoordinator>,
        versions: Arc<VersionPreferenceResolver>,
        preflight: Arc<PreflightHandler>,
        routes: Arc<RouteSource>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            coordinator,
            versions,
            preflight,
            routes,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Arc<RegionFailoverCoordinator> {
        &self.coordinator
    }

    pub fn routes(&self) -> &Arc<RouteSource> {
        &self.routes
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run every stage for `request`
    pub async fn handle(&self, request: &InboundRequest) -> (RequestContext, PipelineDecision) {
        let mut ctx = RequestContext::from_request(request, &self.settings.tenant_header);
        ctx.region = Some(self.coordinator.current_region());
        ctx.effective_version = self
            .versions
            .resolve(ctx.tenant_id.as_deref(), &request.path)
            .await;

        if let Some(result) = self.preflight.handle(request) {
            let decision = match result {
                Ok(response) => PipelineDecision::Respond(response),
                Err(e) => PipelineDecision::Reject(e),
            };
            return (ctx, decision);
        }

        let decision = match self.routes.find(request).await {
            Some(route) => PipelineDecision::Proxy(self.upstream_request(request, &ctx, route)),
            None => {
                debug!(
                    correlation_id = %ctx.correlation_id,
                    method = %request.method,
                    path = %request.path,
                    "No route matched"
                );
                PipelineDecision::Reject(ControlPlaneError::NoRoute {
                    method: request.method.to_string(),
                    path: request.path.clone(),
                })
            }
        };
        (ctx, decision)
    }

    /// Report how the upstream call ended
    pub fn complete(&self, ctx: &RequestContext, outcome: &UpstreamOutcome) {
        debug!(
            correlation_id = %ctx.correlation_id,
            region = ctx.region.as_deref().unwrap_or("-"),
            outcome = outcome.label(),
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "Upstream call completed"
        );
        self.coordinator.observe(outcome);
    }

    /// Add the region and correlation headers to a client response
    pub fn tag_response(&self, ctx: &RequestContext, headers: &mut HeaderMap) {
        if let Some(region) = &ctx.region {
            insert_header(headers, &self.settings.region_header, region);
        }
        insert_header(headers, "x-request-id", ctx.correlation_id.as_str());
    }

    fn upstream_request(
        &self,
        request: &InboundRequest,
        ctx: &RequestContext,
        mut route: RouteMatch,
    ) -> UpstreamRequest {
        if self.settings.rewrite_path {
            if let Some(version) = &ctx.effective_version {
                route.path = rewrite_version_segment(&route.path, version);
            }
        }

        let mut headers = request.headers.clone();
        for name in HOP_BY_HOP_HEADERS {
            headers.remove(*name);
        }
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        for name in &route.remove_headers {
            headers.remove(name.as_str());
        }
        for (name, value) in &route.add_headers {
            insert_header(&mut headers, name, value);
        }

        if let Some(region) = &ctx.region {
            insert_header(&mut headers, &self.settings.region_header, region);
        }
        if let Some(version) = &ctx.effective_version {
            insert_header(&mut headers, &self.settings.version_header, version);
        }
        if let Some(tenant) = &ctx.tenant_id {
            insert_header(&mut headers, &self.settings.tenant_header, tenant);
        }
        insert_header(&mut headers, "x-request-id", ctx.correlation_id.as_str());

        UpstreamRequest {
            url: route.upstream_url(),
            route_id: route.route_id,
            variant_id: route.variant_id,
            method: request.method.clone(),
            headers,
        }
    }
}
