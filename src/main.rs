//! # Edge Control Plane - Main Entry Point
//!
//! Startup sequence:
//! 1. load and validate configuration (`CONTROL_PLANE_CONFIG`, default
//!    `config/control-plane.yaml`; a missing file means built-in defaults)
//! 2. initialise logging and, when enabled, the Prometheus recorder
//! 3. build the store backend and the four control plane components
//! 4. start the refresh listener, the optional Redis bridge and the cache sweepers
//! 5. serve until Ctrl-C or SIGTERM

use anyhow::Context;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use edge_control_plane::core::config::{ControlPlaneConfig, StoreBackend};
use edge_control_plane::cors::{CorsPolicy, PreflightCache, PreflightHandler};
use edge_control_plane::failover::RegionFailoverCoordinator;
use edge_control_plane::gateway::{build_app, serve, AppState, EdgePipeline, PipelineSettings};
use edge_control_plane::observability::{init_logging, install_prometheus};
use edge_control_plane::routing::{spawn_redis_bridge, spawn_refresh_listener, RefreshSignal, RouteSource};
use edge_control_plane::store::{InMemoryStore, PreferenceStore, RouteStore};
use edge_control_plane::versioning::VersionPreferenceResolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_logging(&config.observability);

    info!("🚀 Starting edge control plane");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Edge control plane failed: {:#}", e);
        return Err(e);
    }

    info!("✅ Edge control plane shutdown complete");
    Ok(())
}

async fn load_config() -> anyhow::Result<ControlPlaneConfig> {
    let config_path = std::env::var("CONTROL_PLANE_CONFIG")
        .unwrap_or_else(|_| "config/control-plane.yaml".to_string());

    if Path::new(&config_path).exists() {
        ControlPlaneConfig::load_from_file(&config_path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", config_path))
    } else {
        let mut config = ControlPlaneConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

async fn run(config: ControlPlaneConfig) -> anyhow::Result<()> {
    let metrics = if config.observability.metrics_enabled {
        info!("📈 Prometheus metrics enabled");
        Some(install_prometheus()?)
    } else {
        None
    };

    info!("🔗 Initializing store backend...");
    let (route_store, preference_store) = build_store(&config).await?;

    info!("🛣️  Building control plane components...");
    let routes = Arc::new(RouteSource::new(route_store, config.routes.cache_ttl));
    let coordinator = Arc::new(RegionFailoverCoordinator::new(config.failover.clone()));
    let versions = Arc::new(
        VersionPreferenceResolver::new(preference_store, config.versioning.effective_cache_ttl())
            .with_namespaces(&config.versioning.namespaces),
    );
    let preflight_cache = Arc::new(PreflightCache::new(config.cors.effective_cache_ttl()));
    let preflight = Arc::new(PreflightHandler::new(
        CorsPolicy::from_config(&config.cors),
        Arc::clone(&preflight_cache),
    ));

    let (refresh, receiver) = RefreshSignal::channel();
    let _listener = spawn_refresh_listener(Arc::clone(&routes), receiver);
    let _preflight_sweeper = preflight_cache.spawn_sweeper(config.cors.sweep_interval);
    let _preference_sweeper = versions.spawn_sweeper(config.versioning.sweep_interval);
    let _bridge = config.refresh.redis_url.clone().map(|url| {
        info!(channel = %config.refresh.channel, "📡 Redis route refresh bridge enabled");
        spawn_redis_bridge(
            url,
            config.refresh.channel.clone(),
            config.refresh.reconnect_delay,
            refresh.clone(),
        )
    });

    // Warm the route cache so the first request does not pay for the load
    let warmed = routes.list().await;
    info!(routes = warmed.len(), "✅ Route cache warmed");

    let pipeline = Arc::new(EdgePipeline::new(
        coordinator,
        versions,
        preflight,
        routes,
        PipelineSettings::from_config(&config),
    ));
    let state = AppState::new(pipeline, config.server.upstream_timeout, refresh, metrics)?;
    let app = build_app(state, config.server.admin_enabled);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    if config.server.admin_enabled {
        info!("⚙️  Admin endpoints mounted under {}/admin", addr);
    }

    serve(app, addr).await?;
    Ok(())
}

async fn build_store(
    config: &ControlPlaneConfig,
) -> anyhow::Result<(Arc<dyn RouteStore>, Arc<dyn PreferenceStore>)> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = match &config.store.seed_file {
                Some(path) => InMemoryStore::from_seed_file(path)
                    .await
                    .with_context(|| format!("Failed to seed memory store from {}", path))?,
                None => {
                    warn!("⚠️  Memory store without seed file; no routes will match");
                    InMemoryStore::new()
                }
            };
            let store = Arc::new(store);
            let route_store: Arc<dyn RouteStore> = store.clone();
            let preference_store: Arc<dyn PreferenceStore> = store;
            Ok((route_store, preference_store))
        }
        StoreBackend::Postgres => build_postgres_store(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn build_postgres_store(
    config: &ControlPlaneConfig,
) -> anyhow::Result<(Arc<dyn RouteStore>, Arc<dyn PreferenceStore>)> {
    use edge_control_plane::store::PostgresStore;

    let url = config
        .store
        .database_url
        .as_deref()
        .context("store.database_url is required for the postgres backend")?;
    let store = Arc::new(PostgresStore::connect(url, config.store.max_connections).await?);
    let route_store: Arc<dyn RouteStore> = store.clone();
    let preference_store: Arc<dyn PreferenceStore> = store;
    Ok((route_store, preference_store))
}

#[cfg(not(feature = "postgres"))]
async fn build_postgres_store(
    _config: &ControlPlaneConfig,
) -> anyhow::Result<(Arc<dyn RouteStore>, Arc<dyn PreferenceStore>)> {
    anyhow::bail!("the postgres store backend requires building with the `postgres` feature")
}
