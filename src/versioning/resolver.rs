//! # Version Preference Resolver
//!
//! Resolves the API version a tenant prefers for a logical resource.
//!
//! ## Resource keys
//! A request path is reduced to a resource key: split on `/`, drop empty segments and
//! version segments (`v2`, `V3`, `v1.2`), lower-case the rest and keep at most two
//! segments. `/api/v2/orders/123` and `/API/V3/Orders` both become `/api/orders`.
//!
//! When the store has no row for a two-segment key, one fallback key is tried. If the
//! first segment is a configured namespace (`api` by default) it is stripped, so
//! `/api/orders` falls back to `/orders`. Otherwise the first segment is the resource
//! and the sub-resource is dropped: `/billing/invoices` falls back to `/billing`.
//!
//! ## Caching
//! Outcomes, including "no preference", are cached per (tenant, resource) for a TTL.
//! Store errors degrade to "no preference" for that call and are not cached. A sweeper
//! task purges expired entries.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::core::config::DEFAULT_PREFERENCE_TTL;
use crate::observability::metrics::VERSION_PREFERENCE;
use crate::store::{PreferenceStore, TenantVersionPreference};

const MAX_RESOURCE_SEGMENTS: usize = 2;

/// Whether a path segment names an API version (`v2`, `V3`, `v1.2`)
pub fn is_version_segment(segment: &str) -> bool {
    match segment.strip_prefix(&['v', 'V'][..]) {
        Some(rest) if !rest.is_empty() => rest
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())),
        _ => false,
    }
}

/// Normalised resource key of a request path, `None` if nothing remains
pub fn normalize_resource(path: &str) -> Option<String> {
    let path = path.split(&['?', '#'][..]).next().unwrap_or_default();
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty() && !is_version_segment(s))
        .take(MAX_RESOURCE_SEGMENTS)
        .map(str::to_lowercase)
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(format!("/{}", segments.join("/")))
    }
}

/// Replace the first version segment of `path` with `version`
///
/// Paths without a version segment are returned unchanged.
pub fn rewrite_version_segment(path: &str, version: &str) -> String {
    let mut replaced = false;
    let rewritten: Vec<&str> = path
        .split('/')
        .map(|segment| {
            if !replaced && is_version_segment(segment) {
                replaced = true;
                version
            } else {
                segment
            }
        })
        .collect();
    rewritten.join("/")
}

#[derive(Debug, Clone)]
struct CachedPreference {
    preference: Option<Arc<TenantVersionPreference>>,
    expires_at: Instant,
}

/// Cache-fronted lookup of tenant version preferences
pub struct VersionPreferenceResolver {
    store: Arc<dyn PreferenceStore>,
    cache: DashMap<(String, String), CachedPreference>,
    ttl: Duration,

    /// Lower-cased leading segments that are not resources
    namespaces: Vec<String>,
}

impl VersionPreferenceResolver {
    /// A zero TTL means the default of ten minutes
    pub fn new(store: Arc<dyn PreferenceStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl: if ttl.is_zero() { DEFAULT_PREFERENCE_TTL } else { ttl },
            namespaces: vec!["api".to_string()],
        }
    }

    /// Replace the namespace segments stripped by the fallback lookup
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.namespaces = namespaces
            .into_iter()
            .map(|ns| ns.as_ref().trim().to_lowercase())
            .filter(|ns| !ns.is_empty())
            .collect();
        self
    }

    /// Preferred version for the tenant and path
    pub async fn resolve(&self, tenant_id: Option<&str>, path: &str) -> Option<String> {
        self.resolve_preference(tenant_id, path)
            .await
            .map(|preference| preference.preferred_version.clone())
    }

    /// Full preference row (preferred and fallback version)
    pub async fn resolve_preference(
        &self,
        tenant_id: Option<&str>,
        path: &str,
    ) -> Option<Arc<TenantVersionPreference>> {
        let tenant = match tenant_id.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tenant) => tenant,
            None => {
                metrics::counter!(VERSION_PREFERENCE, "result" => "no_tenant").increment(1);
                return None;
            }
        };
        let resource = normalize_resource(path)?;
        let key = (tenant.to_lowercase(), resource);

        if let Some(cached) = self.cached(&key) {
            metrics::counter!(VERSION_PREFERENCE, "result" => "hit").increment(1);
            return cached;
        }
        metrics::counter!(VERSION_PREFERENCE, "result" => "miss").increment(1);

        match self.lookup(tenant, &key.1).await {
            Ok(preference) => {
                let preference = preference.map(Arc::new);
                debug!(
                    tenant = %tenant,
                    resource = %key.1,
                    version = ?preference.as_ref().map(|p| &p.preferred_version),
                    "Version preference loaded"
                );
                self.cache.insert(
                    key,
                    CachedPreference {
                        preference: preference.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                preference
            }
            Err(e) => {
                metrics::counter!(VERSION_PREFERENCE, "result" => "store_error").increment(1);
                warn!(tenant = %tenant, resource = %key.1, error = %e, "Preference store unavailable, serving no preference");
                None
            }
        }
    }

    /// Remove expired entries; returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.cache.len();
        self.cache.retain(|_, cached| cached.expires_at > now);
        before.saturating_sub(self.cache.len())
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Background task running [`Self::purge_expired`] every `every`
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = resolver.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = resolver.cached_entries(), "Swept expired version preferences");
                }
            }
        })
    }

    /// `Some(outcome)` on an unexpired hit
    fn cached(&self, key: &(String, String)) -> Option<Option<Arc<TenantVersionPreference>>> {
        let now = Instant::now();
        if let Some(cached) = self.cache.get(key) {
            if cached.expires_at > now {
                return Some(cached.preference.clone());
            }
        }
        self.cache.remove_if(key, |_, cached| cached.expires_at <= now);
        None
    }

    async fn lookup(
        &self,
        tenant: &str,
        resource: &str,
    ) -> crate::store::StoreResult<Option<TenantVersionPreference>> {
        if let Some(preference) = self.store.find_preference(tenant, resource).await? {
            return Ok(Some(preference));
        }

        match self.fallback_key(resource) {
            Some(fallback) => self.store.find_preference(tenant, &fallback).await,
            None => Ok(None),
        }
    }

    /// "/api/billing" -> "/billing", "/billing/invoices" -> "/billing"
    fn fallback_key(&self, resource: &str) -> Option<String> {
        let (first, second) = resource.strip_prefix('/')?.split_once('/')?;
        if self.namespaces.iter().any(|ns| ns == first) {
            Some(format!("/{}", second))
        } else {
            Some(format!("/{}", first))
        }
    }
}
