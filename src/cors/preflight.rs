//! # Preflight Cache
//!
//! Short-circuits CORS preflights with a cached decision.
//!
//! The cache key is (origin, requested method, path, normalised requested headers), where
//! the header list is trimmed, lower-cased, sorted and joined; preflights that differ only
//! in header order or case share one entry. Entries expire lazily on lookup and are swept
//! in the background. Rejections are never stored.

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::policy::{normalize_origin, CorsHeaders, CorsPolicy, PreflightDecision};
use crate::core::config::DEFAULT_PREFLIGHT_TTL;
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::types::InboundRequest;
use crate::observability::metrics::{PREFLIGHT_CACHE, PREFLIGHT_REJECTIONS};

const REQUEST_METHOD: &str = "access-control-request-method";
const REQUEST_HEADERS: &str = "access-control-request-headers";

/// Identity of a preflight decision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreflightKey {
    pub origin: String,
    pub method: String,
    pub path: String,

    /// Sorted, lower-cased, comma-joined requested headers
    pub headers: String,
}

impl PreflightKey {
    pub fn new(origin: &str, method: &str, path: &str, requested_headers: &[String]) -> Self {
        Self {
            origin: normalize_origin(origin),
            method: method.trim().to_ascii_uppercase(),
            path: path.to_string(),
            headers: requested_headers.join(","),
        }
    }
}

/// Split, trim, lower-case and sort an `Access-Control-Request-Headers` value
pub fn normalize_requested_headers(raw: Option<&str>) -> Vec<String> {
    let mut headers: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect();
    headers.sort();
    headers.dedup();
    headers
}

#[derive(Debug)]
struct CacheEntry {
    headers: Arc<CorsHeaders>,
    expires_at: Instant,
}

/// TTL cache of allowed preflight decisions
#[derive(Debug)]
pub struct PreflightCache {
    entries: DashMap<PreflightKey, CacheEntry>,
    ttl: Duration,
}

impl PreflightCache {
    /// A zero TTL means the default of ten minutes
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: if ttl.is_zero() { DEFAULT_PREFLIGHT_TTL } else { ttl },
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached headers for `key`, removing the entry if it has expired
    pub fn lookup(&self, key: &PreflightKey) -> Option<Arc<CorsHeaders>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(Arc::clone(&entry.headers));
            }
        }

        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Insert or overwrite with expiry `now + ttl`
    pub fn store(&self, key: PreflightKey, headers: Arc<CorsHeaders>) {
        self.entries.insert(
            key,
            CacheEntry {
                headers,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Background task running [`Self::purge_expired`] every `every`
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "Swept expired preflight decisions");
                }
            }
        })
    }
}

/// A preflight answer: `204 No Content` plus CORS headers
#[derive(Debug, Clone)]
pub struct PreflightResponse {
    pub headers: HeaderMap,
    pub cache_hit: bool,
}

impl IntoResponse for PreflightResponse {
    fn into_response(self) -> Response {
        (StatusCode::NO_CONTENT, self.headers).into_response()
    }
}

/// Recognises preflights and answers them from the cache or the policy
pub struct PreflightHandler {
    policy: CorsPolicy,
    cache: Arc<PreflightCache>,
}

impl PreflightHandler {
    pub fn new(policy: CorsPolicy, cache: Arc<PreflightCache>) -> Self {
        info!(ttl = ?cache.ttl(), "Preflight cache ready");
        Self { policy, cache }
    }

    pub fn cache(&self) -> &Arc<PreflightCache> {
        &self.cache
    }

    /// `OPTIONS` with both `Origin` and `Access-Control-Request-Method`
    pub fn is_preflight(request: &InboundRequest) -> bool {
        request.method == Method::OPTIONS
            && request.header("origin").is_some()
            && request.header(REQUEST_METHOD).is_some()
    }

    /// `None` for non-preflight requests
    ///
    /// On a miss the policy is evaluated once; an allowed decision is stored and the
    /// same value answers the current request.
    pub fn handle(&self, request: &InboundRequest) -> Option<ControlPlaneResult<PreflightResponse>> {
        if !Self::is_preflight(request) {
            return None;
        }

        let origin = request.header("origin").unwrap_or_default();
        let method = request.header(REQUEST_METHOD).unwrap_or_default();
        let requested = normalize_requested_headers(request.header(REQUEST_HEADERS));
        let key = PreflightKey::new(origin, method, &request.path, &requested);

        if let Some(headers) = self.cache.lookup(&key) {
            metrics::counter!(PREFLIGHT_CACHE, "result" => "hit").increment(1);
            debug!(origin = %origin, method = %method, path = %request.path, "Preflight cache hit");
            return Some(Ok(PreflightResponse {
                headers: headers.to_header_map(),
                cache_hit: true,
            }));
        }
        metrics::counter!(PREFLIGHT_CACHE, "result" => "miss").increment(1);

        match self.policy.evaluate(origin, method, &requested) {
            PreflightDecision::Allowed(headers) => {
                let headers = Arc::new(headers);
                self.cache.store(key, Arc::clone(&headers));
                Some(Ok(PreflightResponse {
                    headers: headers.to_header_map(),
                    cache_hit: false,
                }))
            }
            PreflightDecision::Rejected(reason) => {
                metrics::counter!(PREFLIGHT_REJECTIONS).increment(1);
                warn!(origin = %origin, method = %method, path = %request.path, reason = %reason, "Preflight rejected");
                Some(Err(ControlPlaneError::policy_rejection(reason)))
            }
        }
    }
}
