//! # Configuration Module
//!
//! Configuration structures and loading for the edge control plane.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human-readable durations (`"5m"`, `"60s"`) via `humantime-serde`
//! - Environment variable override support (`CONTROL_PLANE_<SECTION>_<FIELD>`)
//! - Validation that collects every problem before failing
//!
//! Failover settings are immutable input: they are read once at startup and never
//! mutated by the coordinator.

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::core::error::{ControlPlaneError, ControlPlaneResult};

/// Default TTL of the resolved route list
pub const DEFAULT_ROUTE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default TTL of cached preflight decisions
pub const DEFAULT_PREFLIGHT_TTL: Duration = Duration::from_secs(10 * 60);

/// Default TTL of cached tenant version preferences
pub const DEFAULT_PREFERENCE_TTL: Duration = Duration::from_secs(10 * 60);

/// Complete control plane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Serving binary settings
    pub server: ServerConfig,

    /// Route source caching
    pub routes: RouteSourceConfig,

    /// Region failover
    pub failover: FailoverConfig,

    /// CORS policy and preflight caching
    pub cors: CorsConfig,

    /// Tenant API version preferences
    pub versioning: VersioningConfig,

    /// Backing store selection
    pub store: StoreConfig,

    /// External refresh notifications
    pub refresh: RefreshConfig,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl ControlPlaneConfig {
    /// Load configuration from a YAML (or `.json`) file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ControlPlaneResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControlPlaneError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: ControlPlaneConfig =
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                serde_json::from_str(&content).map_err(|e| {
                    ControlPlaneError::config(format!("Failed to parse JSON config: {}", e))
                })?
            } else {
                serde_yaml::from_str(&content)
                    .map_err(|e| ControlPlaneError::config(format!("Failed to parse config: {}", e)))?
            };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: CONTROL_PLANE_<SECTION>_<FIELD>
    /// For example: CONTROL_PLANE_FAILOVER_ENABLED=true
    pub fn apply_env_overrides(&mut self) -> ControlPlaneResult<()> {
        use std::env;

        if let Ok(addr) = env::var("CONTROL_PLANE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("CONTROL_PLANE_SERVER_PORT") {
            self.server.port = port.parse().map_err(|e| {
                ControlPlaneError::config(format!("Invalid CONTROL_PLANE_SERVER_PORT: {}", e))
            })?;
        }

        if let Ok(timeout) = env::var("CONTROL_PLANE_SERVER_UPSTREAM_TIMEOUT") {
            self.server.upstream_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                ControlPlaneError::config(format!(
                    "Invalid CONTROL_PLANE_SERVER_UPSTREAM_TIMEOUT: {}",
                    e
                ))
            })?;
        }

        if let Ok(ttl) = env::var("CONTROL_PLANE_ROUTES_CACHE_TTL") {
            self.routes.cache_ttl = humantime::parse_duration(&ttl).map_err(|e| {
                ControlPlaneError::config(format!("Invalid CONTROL_PLANE_ROUTES_CACHE_TTL: {}", e))
            })?;
        }

        if let Ok(enabled) = env::var("CONTROL_PLANE_FAILOVER_ENABLED") {
            self.failover.enabled = enabled.parse().map_err(|e| {
                ControlPlaneError::config(format!("Invalid CONTROL_PLANE_FAILOVER_ENABLED: {}", e))
            })?;
        }

        if let Ok(primary) = env::var("CONTROL_PLANE_FAILOVER_PRIMARY_REGION") {
            self.failover.primary_region = primary;
        }

        if let Ok(backups) = env::var("CONTROL_PLANE_FAILOVER_BACKUP_REGIONS") {
            self.failover.backup_regions = backups
                .split(',')
                .map(str::trim)
                .filter(|region| !region.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(threshold) = env::var("CONTROL_PLANE_FAILOVER_FAILURE_THRESHOLD") {
            self.failover.failure_threshold = threshold.parse().map_err(|e| {
                ControlPlaneError::config(format!(
                    "Invalid CONTROL_PLANE_FAILOVER_FAILURE_THRESHOLD: {}",
                    e
                ))
            })?;
        }

        if let Ok(window) = env::var("CONTROL_PLANE_FAILOVER_FAILURE_WINDOW") {
            self.failover.failure_window = humantime::parse_duration(&window).map_err(|e| {
                ControlPlaneError::config(format!(
                    "Invalid CONTROL_PLANE_FAILOVER_FAILURE_WINDOW: {}",
                    e
                ))
            })?;
        }

        if let Ok(ttl) = env::var("CONTROL_PLANE_CORS_PREFLIGHT_CACHE_TTL") {
            self.cors.preflight_cache_ttl = humantime::parse_duration(&ttl).map_err(|e| {
                ControlPlaneError::config(format!(
                    "Invalid CONTROL_PLANE_CORS_PREFLIGHT_CACHE_TTL: {}",
                    e
                ))
            })?;
        }

        if let Ok(url) = env::var("CONTROL_PLANE_STORE_DATABASE_URL") {
            self.store.database_url = Some(url);
        }

        if let Ok(url) = env::var("CONTROL_PLANE_REFRESH_REDIS_URL") {
            self.refresh.redis_url = Some(url);
        }

        if let Ok(level) = env::var("CONTROL_PLANE_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(format) = env::var("CONTROL_PLANE_LOG_FORMAT") {
            self.observability.log_format = match format.as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ControlPlaneError::config(format!(
                        "Invalid CONTROL_PLANE_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem at once
    ///
    /// An enabled failover section without backup regions is accepted: failover simply
    /// becomes a no-op, which is logged here as a warning.
    pub fn validate(&self) -> ControlPlaneResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.parse::<IpAddr>().is_err() {
            errors.push(format!(
                "bind_address '{}' is not a valid IP address",
                self.server.bind_address
            ));
        }

        if self.server.upstream_timeout.is_zero() {
            errors.push("upstream_timeout must be greater than 0".to_string());
        }

        if self.routes.cache_ttl.is_zero() {
            errors.push("routes.cache_ttl must be greater than 0".to_string());
        }

        if self.cors.sweep_interval.is_zero() {
            errors.push("cors.sweep_interval must be greater than 0".to_string());
        }

        if self.versioning.sweep_interval.is_zero() {
            errors.push("versioning.sweep_interval must be greater than 0".to_string());
        }

        if self.failover.primary_region.trim().is_empty() {
            errors.push("failover.primary_region cannot be empty".to_string());
        }

        if self.failover.failure_threshold == 0 {
            errors.push("failover.failure_threshold must be greater than 0".to_string());
        }

        if self.failover.failure_window.is_zero() {
            errors.push("failover.failure_window must be greater than 0".to_string());
        }

        for (field, name) in [
            ("failover.region_header", &self.failover.region_header),
            ("versioning.tenant_header", &self.versioning.tenant_header),
            ("versioning.version_header", &self.versioning.version_header),
        ] {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(format!("{} '{}' is not a valid header name", field, name));
            }
        }

        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            errors.push("store.database_url is required for the postgres backend".to_string());
        }

        if self.cors.allow_credentials && self.cors.allowed_origins.iter().any(|o| o == "*") {
            warn!("CORS allows credentials with a wildcard origin; matching origins will be echoed back");
        }

        if let Some(e) = self.failover.misconfiguration() {
            warn!(error = %e, "Failover configuration accepted with a warning");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ControlPlaneError::config(format!(
                "Configuration validation failed: {}",
                errors.join("; ")
            )))
        }
    }
}

/// Serving binary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// Listening port
    pub port: u16,

    /// Upstream request timeout; a timeout counts as a region failure
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Mount the operator endpoints under `/admin`
    pub admin_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            upstream_timeout: Duration::from_secs(10),
            admin_enabled: true,
        }
    }
}

/// Route source caching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSourceConfig {
    /// How long a loaded route set is served before the next load
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for RouteSourceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_ROUTE_CACHE_TTL,
        }
    }
}

/// Region failover configuration (immutable input of the coordinator)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// When disabled the coordinator is a pass-through
    pub enabled: bool,

    /// Region served in normal operation
    pub primary_region: String,

    /// Ordered list of failover candidates
    pub backup_regions: Vec<String>,

    /// Failures within the window that trigger an automatic failover
    pub failure_threshold: u32,

    /// Sliding window; a gap longer than this resets the failure counter
    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,

    /// Header carrying the active region to the upstream and back to the client
    pub region_header: String,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            primary_region: "primary".to_string(),
            backup_regions: Vec::new(),
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            region_header: "x-gateway-region".to_string(),
        }
    }
}

impl FailoverConfig {
    /// Settings that are accepted but turn failover into a no-op
    pub fn misconfiguration(&self) -> Option<ControlPlaneError> {
        if self.enabled && self.backup_regions.is_empty() {
            Some(ControlPlaneError::misconfiguration(format!(
                "failover is enabled for '{}' without backup regions; failover is a no-op",
                self.primary_region
            )))
        } else {
            None
        }
    }
}

/// CORS policy and preflight cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins: exact values, `*`, or `https://*.example.com`
    pub allowed_origins: Vec<String>,

    /// Allowed request methods
    pub allowed_methods: Vec<String>,

    /// Allowed request headers (`*` allows any)
    pub allowed_headers: Vec<String>,

    /// Response headers exposed to the browser
    pub exposed_headers: Vec<String>,

    /// Allow credentials
    pub allow_credentials: bool,

    /// Max age for preflight responses (seconds)
    pub max_age: u32,

    /// How long a computed preflight decision is reused; zero means the default
    #[serde(with = "humantime_serde")]
    pub preflight_cache_ttl: Duration,

    /// Interval of the background sweep removing expired decisions
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "PATCH".to_string(),
                "HEAD".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "content-type".to_string(),
                "authorization".to_string(),
                "x-requested-with".to_string(),
                "x-tenant-id".to_string(),
            ],
            exposed_headers: vec!["x-request-id".to_string(), "x-gateway-region".to_string()],
            allow_credentials: false,
            max_age: 3600,
            preflight_cache_ttl: DEFAULT_PREFLIGHT_TTL,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CorsConfig {
    /// Effective cache TTL, substituting the default for a zero value
    pub fn effective_cache_ttl(&self) -> Duration {
        if self.preflight_cache_ttl.is_zero() {
            DEFAULT_PREFLIGHT_TTL
        } else {
            self.preflight_cache_ttl
        }
    }
}

/// Tenant version preference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Header carrying the tenant id set by upstream authentication
    pub tenant_header: String,

    /// How long a resolved preference (or its absence) is reused
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Header carrying the effective version to the upstream
    pub version_header: String,

    /// Replace the version segment of the forwarded path with the preferred version
    pub rewrite_path: bool,

    /// Leading path segments that name an API namespace rather than a resource
    pub namespaces: Vec<String>,

    /// How often expired preference entries are purged
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            tenant_header: "x-tenant-id".to_string(),
            cache_ttl: DEFAULT_PREFERENCE_TTL,
            version_header: "x-api-version".to_string(),
            rewrite_path: true,
            namespaces: vec!["api".to_string()],
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl VersioningConfig {
    /// Effective cache TTL, substituting the default for a zero value
    pub fn effective_cache_ttl(&self) -> Duration {
        if self.cache_ttl.is_zero() {
            DEFAULT_PREFERENCE_TTL
        } else {
            self.cache_ttl
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, seeded from the configuration file
    #[default]
    Memory,
    /// PostgreSQL via sqlx (requires the `postgres` feature)
    Postgres,
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Connection string for the relational backend
    pub database_url: Option<String>,

    /// Connection pool size
    pub max_connections: u32,

    /// Seed file (YAML) for the memory backend
    pub seed_file: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 10,
            seed_file: None,
        }
    }
}

/// External refresh notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Redis server publishing route change notifications
    pub redis_url: Option<String>,

    /// Pub/sub channel name
    pub channel: String,

    /// Delay before reconnecting after a pub/sub failure
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: "gateway:routes:refresh".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub log_level: String,

    pub log_format: LogFormat,

    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "edge_control_plane=info,tower_http=info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Tests that read or write process environment variables run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config_validation() {
        let config = ControlPlaneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.routes.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.failover.failure_threshold, 3);
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("control-plane.yaml");

        let config_content = r#"
server:
  bind_address: "127.0.0.1"
  port: 9080
  upstream_timeout: "15s"
routes:
  cache_ttl: "2m"
failover:
  enabled: true
  primary_region: "eu-west-1"
  backup_regions: ["eu-central-1", "us-east-1"]
  failure_threshold: 5
  failure_window: "30s"
cors:
  allowed_origins: ["https://app.example.com"]
  preflight_cache_ttl: "0s"
versioning:
  tenant_header: "x-org-id"
"#;
        tokio::fs::write(&config_path, config_content).await.unwrap();

        let config = ControlPlaneConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.server.port, 9080);
        assert_eq!(config.server.upstream_timeout, Duration::from_secs(15));
        assert_eq!(config.routes.cache_ttl, Duration::from_secs(120));
        assert!(config.failover.enabled);
        assert_eq!(config.failover.backup_regions.len(), 2);
        assert_eq!(config.failover.failure_window, Duration::from_secs(30));
        assert_eq!(config.cors.effective_cache_ttl(), DEFAULT_PREFLIGHT_TTL);
        assert_eq!(config.versioning.tenant_header, "x-org-id");
        assert_eq!(config.versioning.cache_ttl, DEFAULT_PREFERENCE_TTL);
    }

    #[test]
    fn test_environment_variable_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("CONTROL_PLANE_FAILOVER_BACKUP_REGIONS", "us-east-1, ,us-west-2");
        env::set_var("CONTROL_PLANE_FAILOVER_FAILURE_WINDOW", "90s");
        env::set_var("CONTROL_PLANE_LOG_FORMAT", "pretty");

        let mut config = ControlPlaneConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.failover.backup_regions, vec!["us-east-1", "us-west-2"]);
        assert_eq!(config.failover.failure_window, Duration::from_secs(90));
        assert_eq!(config.observability.log_format, LogFormat::Pretty);

        env::remove_var("CONTROL_PLANE_FAILOVER_BACKUP_REGIONS");
        env::remove_var("CONTROL_PLANE_FAILOVER_FAILURE_WINDOW");
        env::remove_var("CONTROL_PLANE_LOG_FORMAT");
    }

    #[test]
    fn test_invalid_environment_variables() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("CONTROL_PLANE_FAILOVER_FAILURE_THRESHOLD", "three");

        let mut config = ControlPlaneConfig::default();
        let result = config.apply_env_overrides();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid CONTROL_PLANE_FAILOVER_FAILURE_THRESHOLD"));

        env::remove_var("CONTROL_PLANE_FAILOVER_FAILURE_THRESHOLD");
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = ControlPlaneConfig::default();
        config.failover.failure_threshold = 0;
        config.failover.primary_region = " ".to_string();
        config.store.backend = StoreBackend::Postgres;
        config.cors.sweep_interval = Duration::ZERO;
        config.versioning.sweep_interval = Duration::ZERO;
        config.failover.region_header = "x gateway region".to_string();
        config.versioning.tenant_header = String::new();

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("cors.sweep_interval"));
        assert!(message.contains("versioning.sweep_interval"));
        assert!(message.contains("failover.region_header"));
        assert!(message.contains("versioning.tenant_header"));
        assert!(message.contains("failure_threshold"));
        assert!(message.contains("primary_region"));
        assert!(message.contains("database_url"));
    }

    #[test]
    fn test_failover_without_backups_is_only_a_warning() {
        let mut config = ControlPlaneConfig::default();
        config.failover.enabled = true;
        config.failover.backup_regions.clear();
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.failover.misconfiguration(),
            Some(ControlPlaneError::Misconfiguration { .. })
        ));

        config.failover.backup_regions.push("us-west-2".to_string());
        assert!(config.failover.misconfiguration().is_none());
    }
}
