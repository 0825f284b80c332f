//! # Proxy Integration Tests
//!
//! Full request path through the axum app against a mock upstream: forwarding,
//! response tagging and failure reporting to the failover coordinator.

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edge_control_plane::core::config::{CorsConfig, FailoverConfig};
use edge_control_plane::cors::{CorsPolicy, PreflightCache, PreflightHandler};
use edge_control_plane::failover::RegionFailoverCoordinator;
use edge_control_plane::gateway::{build_app, AppState, EdgePipeline, PipelineSettings};
use edge_control_plane::routing::{spawn_refresh_listener, RefreshSignal, RouteSource};
use edge_control_plane::store::{InMemoryStore, RouteRow};
use edge_control_plane::versioning::VersionPreferenceResolver;

fn route(id: &str, path_pattern: &str, uri: &str) -> RouteRow {
    RouteRow {
        id: id.to_string(),
        predicates: json!([]),
        filters: json!([]),
        uri: Some(uri.to_string()),
        path_pattern: Some(path_pattern.to_string()),
        metadata: None,
        enabled: true,
        version: 3,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

struct Gateway {
    server: TestServer,
    app: axum::Router,
    store: Arc<InMemoryStore>,
    pipeline: Arc<EdgePipeline>,
}

fn gateway(routes: Vec<RouteRow>, threshold: u32, upstream_timeout: Duration) -> Gateway {
    let store = Arc::new(InMemoryStore::with_data(routes, vec![]));
    let failover = FailoverConfig {
        enabled: true,
        primary_region: "us-east-1".to_string(),
        backup_regions: vec!["us-west-2".to_string()],
        failure_threshold: threshold,
        ..FailoverConfig::default()
    };
    let cors = CorsConfig {
        allowed_origins: vec!["https://app.example.com".to_string()],
        ..CorsConfig::default()
    };

    let routes = Arc::new(RouteSource::new(store.clone(), Duration::from_secs(300)));
    let pipeline = Arc::new(EdgePipeline::new(
        Arc::new(RegionFailoverCoordinator::new(failover)),
        Arc::new(VersionPreferenceResolver::new(store.clone(), Duration::from_secs(600))),
        Arc::new(PreflightHandler::new(
            CorsPolicy::from_config(&cors),
            Arc::new(PreflightCache::new(Duration::from_secs(600))),
        )),
        Arc::clone(&routes),
        PipelineSettings::default(),
    ));

    let (refresh, receiver) = RefreshSignal::channel();
    spawn_refresh_listener(routes, receiver);

    let state = AppState::new(Arc::clone(&pipeline), upstream_timeout, refresh, None).unwrap();
    let app = build_app(state, true);
    let server = TestServer::new(app.clone()).unwrap();
    Gateway {
        server,
        app,
        store,
        pipeline,
    }
}

#[tokio::test]
async fn test_request_is_forwarded_with_region_header() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders/42"))
        .and(header("x-gateway-region", "us-east-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("order 42")
                .insert_header("x-served-by", "orders"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let gw = gateway(vec![route("orders", "/api/orders/**", &upstream.uri())], 3, Duration::from_secs(5));

    let response = gw.server.get("/api/orders/42").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "order 42");
    assert_eq!(response.header("x-served-by"), "orders");
    assert_eq!(response.header("x-gateway-region"), "us-east-1");
}

#[tokio::test]
async fn test_upstream_5xx_triggers_failover() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;

    let gw = gateway(vec![route("orders", "/api/**", &upstream.uri())], 2, Duration::from_secs(5));

    let first = gw.server.get("/api/orders").await;
    assert_eq!(first.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(first.header("x-gateway-region"), "us-east-1");

    gw.server.get("/api/orders").await;
    assert_eq!(gw.pipeline.coordinator().current_region(), "us-west-2");

    let third = gw.server.get("/api/orders").await;
    assert_eq!(third.header("x-gateway-region"), "us-west-2");
}

#[tokio::test]
async fn test_client_errors_reset_the_failure_counter() {
    let upstream = MockServer::start().await;
    Mock::given(path("/api/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;
    Mock::given(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    let gw = gateway(vec![route("api", "/api/**", &upstream.uri())], 2, Duration::from_secs(5));

    gw.server.get("/api/broken").await;
    gw.server.get("/api/missing").await;
    gw.server.get("/api/broken").await;

    assert_eq!(gw.pipeline.coordinator().current_region(), "us-east-1");
    assert_eq!(gw.pipeline.coordinator().snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_upstream_timeout_is_504_and_counts_as_failure() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&upstream)
        .await;

    let gw = gateway(vec![route("slow", "/slow/**", &upstream.uri())], 1, Duration::from_millis(50));

    let response = gw.server.get("/slow/report").await;
    assert_eq!(response.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.json::<Value>()["error"]["type"], "timeout");
    assert_eq!(gw.pipeline.coordinator().current_region(), "us-west-2");
}

#[tokio::test]
async fn test_transport_error_is_502_and_counts_as_failure() {
    // Nothing listens on the discard port
    let gw = gateway(vec![route("dead", "/dead/**", "http://127.0.0.1:9")], 1, Duration::from_secs(2));

    let response = gw.server.get("/dead/letter").await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(gw.pipeline.coordinator().current_region(), "us-west-2");
}

#[tokio::test]
async fn test_preflight_is_answered_without_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let gw = gateway(vec![route("orders", "/api/**", &upstream.uri())], 3, Duration::from_secs(5));

    let request = axum::http::Request::builder()
        .method(axum::http::Method::OPTIONS)
        .uri("/api/orders")
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "PUT")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "https://app.example.com"
    );
    assert_eq!(headers.get("vary").unwrap(), "Origin");
    assert_eq!(headers.get("x-gateway-region").unwrap(), "us-east-1");
}

#[tokio::test]
async fn test_admin_routes_listing_and_refresh() {
    let gw = gateway(vec![route("orders", "/api/orders/**", "http://orders:8080")], 3, Duration::from_secs(5));

    let routes: Value = gw.server.get("/admin/routes").await.json();
    assert_eq!(routes.as_array().unwrap().len(), 1);
    assert_eq!(routes[0]["id"], "orders");
    assert_eq!(routes[0]["targets"][0], "http://orders:8080");
    assert_eq!(routes[0]["version"], 3);

    gw.store
        .replace_routes(vec![
            route("orders", "/api/orders/**", "http://orders:8080"),
            route("billing", "/api/billing/**", "lb://billing"),
        ])
        .await;

    let response = gw.server.post("/admin/routes/refresh").await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);

    // The listener invalidates asynchronously
    let mut listed = 0;
    for _ in 0..50 {
        let routes: Value = gw.server.get("/admin/routes").await.json();
        listed = routes.as_array().map_or(0, Vec::len);
        if listed == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(listed, 2);
}
