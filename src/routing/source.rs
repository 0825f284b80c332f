//! # Route Source
//!
//! Loads enabled route rows from the [`RouteStore`], resolves them and caches the result
//! for a fixed TTL.
//!
//! ## Caching
//! The cache is a single swappable slot (`ArcSwapOption<CacheSlot>`). Whoever finds the
//! slot missing or expired installs a fresh one with a compare-and-swap; every caller
//! then awaits the slot's `OnceCell`, so concurrent callers share one store round trip.
//! Once warm, `list()` is a pointer load plus an initialised-cell read and never touches
//! the store.
//!
//! ## Failure handling
//! A failed load is never cached. Callers that shared the failed load get the last
//! known-good set, or an empty set if nothing was ever loaded, and the failed slot is
//! removed so the next call retries.

use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::definition::RouteDefinition;
use super::filter::OutboundEdits;
use super::predicate::RoutePredicate;
use super::resolver::ResolvedRoute;
use crate::core::types::InboundRequest;
use crate::observability::metrics::{ROUTES_SKIPPED, ROUTE_CACHE_INVALIDATIONS, ROUTE_LOADS};
use crate::store::RouteStore;

/// Shared, immutable route list
pub type RouteList = Arc<Vec<ResolvedRoute>>;

/// One cached computation; `None` inside the cell marks a failed load
struct CacheSlot {
    created_at: Instant,
    routes: OnceCell<Option<RouteList>>,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            routes: OnceCell::new(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// The result of matching a request against the route list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub route_id: String,

    /// Selected target base URI
    pub upstream: String,

    /// Traffic-split variant, when the route is weighted
    pub variant_id: Option<String>,

    /// Path after filters ran
    pub path: String,

    pub query: Option<String>,
    pub add_headers: Vec<(String, String)>,
    pub remove_headers: Vec<String>,
}

impl RouteMatch {
    /// Full upstream URL: target base, rewritten path and the original query
    ///
    /// `lb://name` targets are addressed as `http://name`; name resolution is left to
    /// the platform (DNS or service mesh).
    pub fn upstream_url(&self) -> String {
        let base = match self.upstream.strip_prefix("lb://") {
            Some(name) => format!("http://{}", name),
            None => self.upstream.clone(),
        };

        let mut url = format!("{}{}", base.trim_end_matches('/'), self.path);
        if let Some(query) = &self.query {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// Cached, single-flight source of resolved routes
pub struct RouteSource {
    store: Arc<dyn RouteStore>,
    ttl: Duration,
    slot: ArcSwapOption<CacheSlot>,

    /// Last successfully loaded set; survives `invalidate()`
    last_good: ArcSwapOption<Vec<ResolvedRoute>>,
}

impl RouteSource {
    pub fn new(store: Arc<dyn RouteStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            slot: ArcSwapOption::empty(),
            last_good: ArcSwapOption::empty(),
        }
    }

    /// The current list of enabled, resolved routes
    pub async fn list(&self) -> RouteList {
        loop {
            let current = self.slot.load_full();
            let slot = match &current {
                Some(slot) if !slot.is_expired(self.ttl) => Arc::clone(slot),
                _ => {
                    let fresh = Arc::new(CacheSlot::new());
                    let previous = self.slot.compare_and_swap(&current, Some(Arc::clone(&fresh)));
                    if !same_slot(&previous, &current) {
                        // Another caller installed a slot first; share theirs
                        continue;
                    }
                    fresh
                }
            };

            let outcome = slot.routes.get_or_init(|| self.load()).await;
            return match outcome {
                Some(routes) => Arc::clone(routes),
                None => {
                    let failed = Some(Arc::clone(&slot));
                    self.slot.compare_and_swap(&failed, None::<Arc<CacheSlot>>);
                    self.fallback()
                }
            };
        }
    }

    /// Drop the cached list; the next `list()` reloads from the store
    pub fn invalidate(&self) {
        self.slot.store(None);
        metrics::counter!(ROUTE_CACHE_INVALIDATIONS).increment(1);
        info!("Route cache invalidated");
    }

    /// First route (in store order) whose predicates all match the request and whose
    /// target yields an upstream
    pub async fn find(&self, request: &InboundRequest) -> Option<RouteMatch> {
        let routes = self.list().await;
        let (route, selected) = routes
            .iter()
            .filter(|route| route.predicates.iter().all(|p| p.matches(request)))
            .find_map(|route| route.target.select().map(|selected| (route, selected)))?;
        let variables = path_variables(&route.predicates, &request.path);

        let mut edits = OutboundEdits::new(request.path.clone());
        for filter in &route.filters {
            filter.apply(&mut edits, &variables);
        }

        debug!(
            route_id = %route.id(),
            upstream = %selected.uri,
            variant = ?selected.variant_id,
            "Route matched"
        );

        Some(RouteMatch {
            route_id: route.id().to_string(),
            upstream: selected.uri.to_string(),
            variant_id: selected.variant_id.map(str::to_string),
            path: edits.path,
            query: request.query.clone(),
            add_headers: edits.add_headers,
            remove_headers: edits.remove_headers,
        })
    }

    async fn load(&self) -> Option<RouteList> {
        let rows = match self.store.load_enabled_routes().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Route store unavailable");
                return None;
            }
        };

        let total = rows.len();
        let mut resolved = Vec::with_capacity(total);
        for row in rows.iter().filter(|row| row.enabled) {
            let outcome = RouteDefinition::from_row(row).and_then(ResolvedRoute::resolve);
            match outcome {
                Ok(Some(route)) => resolved.push(route),
                Ok(None) => {
                    warn!(route_id = %row.id, "Route has no target after blue-green/traffic-split resolution, skipping");
                    metrics::counter!(ROUTES_SKIPPED, "reason" => "no_target").increment(1);
                }
                Err(e) => {
                    warn!(route_id = %row.id, error = %e, "Malformed route row, skipping");
                    metrics::counter!(ROUTES_SKIPPED, "reason" => "malformed").increment(1);
                }
            }
        }

        info!(loaded = resolved.len(), rows = total, "Routes loaded");
        metrics::counter!(ROUTE_LOADS, "outcome" => "success").increment(1);

        let routes = Arc::new(resolved);
        self.last_good.store(Some(Arc::clone(&routes)));
        Some(routes)
    }

    fn fallback(&self) -> RouteList {
        match self.last_good.load_full() {
            Some(routes) => {
                warn!(routes = routes.len(), "Serving last known-good routes");
                metrics::counter!(ROUTE_LOADS, "outcome" => "stale").increment(1);
                routes
            }
            None => {
                warn!("No routes loaded yet; serving an empty route set");
                metrics::counter!(ROUTE_LOADS, "outcome" => "empty").increment(1);
                Arc::new(Vec::new())
            }
        }
    }
}

fn same_slot(a: &Option<Arc<CacheSlot>>, b: &Option<Arc<CacheSlot>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// `{var}` captures of the first path pattern matching the request
fn path_variables(predicates: &[RoutePredicate], path: &str) -> HashMap<String, String> {
    predicates
        .iter()
        .find_map(|predicate| match predicate {
            RoutePredicate::Path(patterns) => patterns.iter().find_map(|p| p.captures(path)),
            _ => None,
        })
        .unwrap_or_default()
}
