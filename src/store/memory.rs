//! # In-Memory Store
//!
//! Process-local implementation of both store traits. Used for single-node deployments
//! seeded from a YAML file, and by tests, which rely on its read counters and failure
//! injection.

use super::{PreferenceStore, RouteRow, RouteStore, StoreError, StoreResult, TenantVersionPreference};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Seed file layout for the memory backend
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub routes: Vec<RouteRow>,
    pub preferences: Vec<TenantVersionPreference>,
}

/// In-memory route and preference store
#[derive(Default)]
pub struct InMemoryStore {
    routes: RwLock<Vec<RouteRow>>,

    /// Keyed by (lower-cased tenant id, resource key)
    preferences: DashMap<(String, String), TenantVersionPreference>,

    route_loads: AtomicUsize,
    preference_lookups: AtomicUsize,

    fail_routes: AtomicBool,
    fail_preferences: AtomicBool,

    /// Artificial latency of route loads in milliseconds
    route_latency_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with rows
    pub fn with_data(routes: Vec<RouteRow>, preferences: Vec<TenantVersionPreference>) -> Self {
        let store = Self {
            routes: RwLock::new(routes),
            ..Self::default()
        };
        for preference in preferences {
            store.insert_preference(preference);
        }
        store
    }

    /// Load rows from a YAML seed file
    pub async fn from_seed_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("failed to read seed file: {}", e),
            })?;
        let seed: SeedData = serde_yaml::from_str(&content).map_err(|e| StoreError::Decode {
            message: format!("invalid seed file: {}", e),
        })?;

        info!(
            routes = seed.routes.len(),
            preferences = seed.preferences.len(),
            "Seeded in-memory store"
        );
        Ok(Self::with_data(seed.routes, seed.preferences))
    }

    /// Replace all route rows (stands in for the administrative write path)
    pub async fn replace_routes(&self, routes: Vec<RouteRow>) {
        *self.routes.write().await = routes;
    }

    /// Insert or overwrite a preference row
    pub fn insert_preference(&self, preference: TenantVersionPreference) {
        let key = (
            preference.tenant_id.to_lowercase(),
            preference.resource_key.clone(),
        );
        self.preferences.insert(key, preference);
    }

    /// Number of route loads served so far
    pub fn route_loads(&self) -> usize {
        self.route_loads.load(Ordering::SeqCst)
    }

    /// Number of preference lookups served so far
    pub fn preference_lookups(&self) -> usize {
        self.preference_lookups.load(Ordering::SeqCst)
    }

    /// Make route loads fail until reset
    pub fn set_routes_unavailable(&self, unavailable: bool) {
        self.fail_routes.store(unavailable, Ordering::SeqCst);
    }

    /// Make preference lookups fail until reset
    pub fn set_preferences_unavailable(&self, unavailable: bool) {
        self.fail_preferences.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every route load, widening the window for concurrent callers
    pub fn set_route_latency(&self, latency: Duration) {
        self.route_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl RouteStore for InMemoryStore {
    async fn load_enabled_routes(&self) -> StoreResult<Vec<RouteRow>> {
        self.route_loads.fetch_add(1, Ordering::SeqCst);

        let latency = self.route_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.fail_routes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }

        let routes = self.routes.read().await;
        Ok(routes.iter().filter(|row| row.enabled).cloned().collect())
    }
}

#[async_trait]
impl PreferenceStore for InMemoryStore {
    async fn find_preference(
        &self,
        tenant_id: &str,
        resource_key: &str,
    ) -> StoreResult<Option<TenantVersionPreference>> {
        self.preference_lookups.fetch_add(1, Ordering::SeqCst);

        if self.fail_preferences.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }

        let key = (tenant_id.to_lowercase(), resource_key.to_string());
        Ok(self.preferences.get(&key).map(|entry| entry.value().clone()))
    }
}
