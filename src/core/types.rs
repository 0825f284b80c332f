//! # Core Types Module
//!
//! Request-scoped data that flows through the control plane stages.
//!
//! Tenant, region and correlation id travel in an explicit [`RequestContext`] that every
//! stage receives by reference; there is no ambient per-thread state.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// Correlation ID for tracking a request across the gateway and its upstreams
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse an ID supplied by the caller
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parts of an inbound request the control plane looks at
///
/// Bodies never pass through the control plane stages.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,

    /// Path without the query string
    pub path: String,

    /// Raw query string, if any
    pub query: Option<String>,

    pub headers: HeaderMap,
}

impl InboundRequest {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };

        Self {
            method,
            path,
            query,
            headers,
        }
    }

    /// Get a header value as a string, ignoring values that are not valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host header without the port
    pub fn host(&self) -> Option<&str> {
        self.header("host").map(|h| h.split(':').next().unwrap_or(h))
    }
}

/// Per-request context threaded through every stage
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, taken from `x-request-id` when the caller supplied one
    pub correlation_id: CorrelationId,

    /// Tenant id set by the upstream authentication filter
    pub tenant_id: Option<String>,

    /// Active region at the time the request was tagged
    pub region: Option<String>,

    /// API version the tenant prefers for this resource
    pub effective_version: Option<String>,

    /// Request start time for latency measurement
    pub start_time: Instant,
}

impl RequestContext {
    /// Build the context for a request, reading the tenant from `tenant_header`
    pub fn from_request(request: &InboundRequest, tenant_header: &str) -> Self {
        let correlation_id = request
            .header("x-request-id")
            .filter(|id| !id.is_empty())
            .map(|id| CorrelationId::from_string(id.to_string()))
            .unwrap_or_default();

        let tenant_id = request
            .header(tenant_header)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Self {
            correlation_id,
            tenant_id,
            region: None,
            effective_version: None,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

/// Insert a header, silently skipping names or values that are not valid HTTP
pub fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}
