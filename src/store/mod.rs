//! # Store Module
//!
//! Narrow read-only interfaces to the external relational store. The control plane never
//! writes rows; administrative edits happen out-of-band.
//!
//! Backends are selected at startup and injected as `Arc<dyn RouteStore>` /
//! `Arc<dyn PreferenceStore>`:
//! - [`memory::InMemoryStore`]: in-process rows, optionally seeded from a YAML file
//! - `postgres::PostgresStore`: sqlx-backed, behind the `postgres` cargo feature

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::ControlPlaneError;

/// Store operation result
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-specific error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection error: {message}")]
    Connection { message: String },

    #[error("Store query error: {message}")]
    Query { message: String },

    #[error("Row decode error: {message}")]
    Decode { message: String },

    #[error("Store unavailable")]
    Unavailable,
}

impl From<StoreError> for ControlPlaneError {
    fn from(err: StoreError) -> Self {
        ControlPlaneError::store_unavailable("relational", err.to_string())
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A raw route row as stored by the administrative path
///
/// Predicates, filters and deployment metadata are stored as JSON documents and
/// only interpreted by the route source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRow {
    pub id: String,

    #[serde(default)]
    pub predicates: serde_json::Value,

    #[serde(default)]
    pub filters: serde_json::Value,

    /// Plain target URI (or `lb://` logical name)
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub path_pattern: Option<String>,

    /// Blue-green slot and traffic split document
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub version: i64,

    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// A tenant's preferred API version for one logical resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantVersionPreference {
    pub tenant_id: String,

    /// Normalized resource key, e.g. `/billing` or `/api/orders`
    pub resource_key: String,

    pub preferred_version: String,

    #[serde(default)]
    pub fallback_version: Option<String>,

    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
}

/// Read access to route rows
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// All rows with `enabled = true`, in store order
    async fn load_enabled_routes(&self) -> StoreResult<Vec<RouteRow>>;
}

/// Read access to tenant version preferences
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Exact match on resource key, case-insensitive on tenant id
    async fn find_preference(
        &self,
        tenant_id: &str,
        resource_key: &str,
    ) -> StoreResult<Option<TenantVersionPreference>>;
}
