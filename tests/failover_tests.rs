//! # Region Failover Tests
//!
//! Sliding-window failure counting, idempotent failover, linearizable counting under
//! concurrency and the operator endpoints.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use edge_control_plane::core::config::FailoverConfig;
use edge_control_plane::failover::{
    region_admin_router, FailoverOperator, FailureCause, RegionFailoverCoordinator,
    UpstreamOutcome,
};

fn config(threshold: u32, window: Duration) -> FailoverConfig {
    FailoverConfig {
        enabled: true,
        primary_region: "us-east-1".to_string(),
        backup_regions: vec!["us-west-2".to_string(), "eu-west-1".to_string()],
        failure_threshold: threshold,
        failure_window: window,
        ..FailoverConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_within_window_fail_over() {
    let coordinator = RegionFailoverCoordinator::new(config(3, Duration::from_secs(60)));

    coordinator.record_failure(FailureCause::UpstreamStatus(502));
    tokio::time::advance(Duration::from_secs(20)).await;
    coordinator.record_failure(FailureCause::Timeout);
    tokio::time::advance(Duration::from_secs(20)).await;
    let region = coordinator.record_failure(FailureCause::Transport("reset".to_string()));

    assert_eq!(region, "us-west-2");
    assert_eq!(coordinator.snapshot().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failures_spread_beyond_window_never_fail_over() {
    let coordinator = RegionFailoverCoordinator::new(config(3, Duration::from_secs(60)));

    for _ in 0..3 {
        assert_eq!(
            coordinator.record_failure(FailureCause::UpstreamStatus(503)),
            "us-east-1"
        );
        tokio::time::advance(Duration::from_secs(61)).await;
    }
    assert_eq!(coordinator.current_region(), "us-east-1");
    assert_eq!(coordinator.snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_success_resets_counter_without_moving() {
    let coordinator = RegionFailoverCoordinator::new(config(3, Duration::from_secs(60)));

    coordinator.observe(&UpstreamOutcome::UpstreamError(500));
    coordinator.observe(&UpstreamOutcome::TimedOut);
    coordinator.observe(&UpstreamOutcome::Success(404));
    coordinator.observe(&UpstreamOutcome::TransportError("refused".to_string()));

    assert_eq!(coordinator.current_region(), "us-east-1");
    assert_eq!(coordinator.snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_trigger_is_idempotent_and_restore_returns_primary() {
    let coordinator = RegionFailoverCoordinator::new(config(3, Duration::from_secs(60)));

    let first = coordinator.trigger_failover("drill");
    let second = coordinator.trigger_failover("drill");
    assert_eq!(first, "us-west-2");
    assert_eq!(first, second);

    assert_eq!(coordinator.restore_primary("drill over"), "us-east-1");
    assert_eq!(coordinator.restore_primary("drill over"), "us-east-1");
}

#[tokio::test]
async fn test_backup_is_sticky() {
    let coordinator = RegionFailoverCoordinator::new(config(1, Duration::from_secs(60)));
    coordinator.record_failure(FailureCause::Timeout);

    for _ in 0..10 {
        coordinator.observe(&UpstreamOutcome::Success(200));
    }
    assert_eq!(coordinator.current_region(), "us-west-2");
}

#[tokio::test]
async fn test_no_backups_is_a_noop() {
    let coordinator = RegionFailoverCoordinator::new(FailoverConfig {
        backup_regions: vec![],
        ..config(1, Duration::from_secs(60))
    });

    assert_eq!(coordinator.record_failure(FailureCause::Timeout), "us-east-1");
    assert_eq!(coordinator.trigger_failover("manual"), "us-east-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_failures_are_never_lost() {
    let coordinator = Arc::new(RegionFailoverCoordinator::new(config(
        1_000_000,
        Duration::from_secs(3600),
    )));

    let workers = (0..8).map(|_| {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            for _ in 0..500 {
                coordinator.record_failure(FailureCause::UpstreamStatus(500));
            }
        })
    });
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(coordinator.snapshot().failure_count, 4000);
}

fn admin_server(enabled: bool) -> TestServer {
    let coordinator = Arc::new(RegionFailoverCoordinator::new(FailoverConfig {
        enabled,
        ..config(3, Duration::from_secs(60))
    }));
    TestServer::new(region_admin_router(FailoverOperator::new(coordinator))).unwrap()
}

#[tokio::test]
async fn test_admin_region_snapshot() {
    let server = admin_server(true);

    let response = server.get("/admin/region").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["active_region"], "us-east-1");
    assert_eq!(body["on_primary"], true);
    assert_eq!(body["failure_threshold"], 3);
}

#[tokio::test]
async fn test_admin_failover_and_restore() {
    let server = admin_server(true);

    let response = server
        .post("/admin/region/failover")
        .json(&json!({ "reason": "primary degraded" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["active_region"], "us-west-2");
    assert_eq!(body["reason"], "primary degraded");

    let response = server
        .post("/admin/region/failover")
        .json(&json!({ "region": "eu-west-1" }))
        .await;
    assert_eq!(response.json::<Value>()["active_region"], "eu-west-1");

    let response = server
        .post("/admin/region/failover")
        .json(&json!({ "region": "primary", "reason": "recovered" }))
        .await;
    assert_eq!(response.json::<Value>()["active_region"], "us-east-1");
}

#[tokio::test]
async fn test_admin_rejects_unknown_region() {
    let server = admin_server(true);

    let response = server
        .post("/admin/region/failover")
        .json(&json!({ "region": "ap-south-1" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn test_admin_precondition_failed_when_disabled() {
    let server = admin_server(false);

    let response = server
        .post("/admin/region/failover")
        .json(&json!({ "region": "us-west-2" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);

    let response = server
        .post("/admin/region/failover")
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);
}
