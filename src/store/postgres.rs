//! PostgreSQL store backend
//!
//! Expected tables:
//!
//! ```sql
//! CREATE TABLE gateway_routes (
//!     id            TEXT PRIMARY KEY,
//!     predicates    JSONB NOT NULL DEFAULT '[]',
//!     filters       JSONB NOT NULL DEFAULT '[]',
//!     uri           TEXT,
//!     path_pattern  TEXT,
//!     metadata      JSONB,
//!     enabled       BOOLEAN NOT NULL DEFAULT TRUE,
//!     version       BIGINT NOT NULL DEFAULT 0,
//!     created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE tenant_version_preferences (
//!     tenant_id          TEXT NOT NULL,
//!     resource_key       TEXT NOT NULL,
//!     preferred_version  TEXT NOT NULL,
//!     fallback_version   TEXT,
//!     updated_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     PRIMARY KEY (tenant_id, resource_key)
//! );
//! ```

use super::{PreferenceStore, RouteRow, RouteStore, StoreError, StoreResult, TenantVersionPreference};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

/// sqlx-backed implementation of both store traits
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with the given pool size
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection {
                message: e.to_string(),
            })?;

        info!(max_connections, "Connected to PostgreSQL route store");
        Ok(Self { pool })
    }

    /// Create from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_route_row(row: &PgRow) -> StoreResult<RouteRow> {
        let decode = |e: sqlx::Error| StoreError::Decode {
            message: e.to_string(),
        };

        Ok(RouteRow {
            id: row.try_get("id").map_err(decode)?,
            predicates: row.try_get("predicates").map_err(decode)?,
            filters: row.try_get("filters").map_err(decode)?,
            uri: row.try_get("uri").map_err(decode)?,
            path_pattern: row.try_get("path_pattern").map_err(decode)?,
            metadata: row.try_get("metadata").map_err(decode)?,
            enabled: row.try_get("enabled").map_err(decode)?,
            version: row.try_get("version").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }

    fn parse_preference_row(row: &PgRow) -> StoreResult<TenantVersionPreference> {
        let decode = |e: sqlx::Error| StoreError::Decode {
            message: e.to_string(),
        };

        Ok(TenantVersionPreference {
            tenant_id: row.try_get("tenant_id").map_err(decode)?,
            resource_key: row.try_get("resource_key").map_err(decode)?,
            preferred_version: row.try_get("preferred_version").map_err(decode)?,
            fallback_version: row.try_get("fallback_version").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }
}

#[async_trait]
impl RouteStore for PostgresStore {
    async fn load_enabled_routes(&self) -> StoreResult<Vec<RouteRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, predicates, filters, uri, path_pattern, metadata,
                   enabled, version, created_at, updated_at
            FROM gateway_routes
            WHERE enabled = TRUE
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query {
            message: e.to_string(),
        })?;

        // A row that cannot be decoded is dropped here; the route source applies the
        // same one-bad-row policy to rows that decode but fail conversion.
        let mut routes = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::parse_route_row(row) {
                Ok(route) => routes.push(route),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable route row"),
            }
        }
        Ok(routes)
    }
}

#[async_trait]
impl PreferenceStore for PostgresStore {
    async fn find_preference(
        &self,
        tenant_id: &str,
        resource_key: &str,
    ) -> StoreResult<Option<TenantVersionPreference>> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, resource_key, preferred_version, fallback_version, updated_at
            FROM tenant_version_preferences
            WHERE LOWER(tenant_id) = LOWER($1) AND resource_key = $2
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(resource_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query {
            message: e.to_string(),
        })?;

        row.as_ref().map(Self::parse_preference_row).transpose()
    }
}
