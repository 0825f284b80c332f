//! Region Failover Admin Endpoints
//!
//! Operator control over the active region:
//! - `GET  /admin/region`: current [`RegionSnapshot`]
//! - `POST /admin/region/failover`: `{"region": "...", "reason": "..."}`
//!
//! An empty region or `"primary"` restores the primary, a named region must be the
//! primary or a configured backup, and an absent region lets the coordinator pick the
//! first backup. Every call answers `412` while failover is disabled.
//!
//! ## Security Note
//! These endpoints change where production traffic goes and must sit behind the
//! gateway's admin authentication.

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::coordinator::{RegionFailoverCoordinator, RegionSnapshot};
use crate::core::error::{ControlPlaneError, ControlPlaneResult};

/// Operator-facing wrapper around the coordinator
#[derive(Clone)]
pub struct FailoverOperator {
    coordinator: Arc<RegionFailoverCoordinator>,
}

impl FailoverOperator {
    pub fn new(coordinator: Arc<RegionFailoverCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Trigger a failover or a restore; returns the resulting active region
    pub fn trigger(&self, region: Option<&str>, reason: &str) -> ControlPlaneResult<String> {
        if !self.coordinator.is_enabled() {
            return Err(ControlPlaneError::precondition_failed(
                "region failover is disabled",
            ));
        }

        let config = self.coordinator.config();
        let region = match region.map(str::trim) {
            None => return Ok(self.coordinator.trigger_failover(reason)),
            Some(region) => region,
        };

        if region.is_empty()
            || region.eq_ignore_ascii_case("primary")
            || region == config.primary_region
        {
            return Ok(self.coordinator.restore_primary(reason));
        }

        if !config.backup_regions.iter().any(|backup| backup == region) {
            return Err(ControlPlaneError::invalid_request(
                "region",
                format!("'{}' is not a configured region", region),
            ));
        }

        Ok(self.coordinator.failover_to(region, reason))
    }

    pub fn snapshot(&self) -> ControlPlaneResult<RegionSnapshot> {
        Ok(self.coordinator.snapshot())
    }
}

/// Body of `POST /admin/region/failover`
#[derive(Debug, Default, Deserialize)]
pub struct FailoverRequest {
    pub region: Option<String>,
    pub reason: Option<String>,
}

/// Response for region transitions
#[derive(Debug, Serialize)]
pub struct FailoverResponse {
    pub active_region: String,
    pub reason: String,
}

/// Region admin routes
pub fn region_admin_router(operator: FailoverOperator) -> Router {
    Router::new()
        .route("/admin/region", get(get_region))
        .route("/admin/region/failover", post(post_failover))
        .with_state(operator)
}

async fn get_region(
    State(operator): State<FailoverOperator>,
) -> ControlPlaneResult<Json<RegionSnapshot>> {
    operator.snapshot().map(Json)
}

async fn post_failover(
    State(operator): State<FailoverOperator>,
    Json(request): Json<FailoverRequest>,
) -> ControlPlaneResult<Json<FailoverResponse>> {
    let reason = request
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "operator request".to_string());

    let active_region = operator.trigger(request.region.as_deref(), &reason)?;
    Ok(Json(FailoverResponse {
        active_region,
        reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FailoverConfig;
    use axum::http::StatusCode;

    fn operator(enabled: bool) -> FailoverOperator {
        FailoverOperator::new(Arc::new(RegionFailoverCoordinator::new(FailoverConfig {
            enabled,
            primary_region: "us-east".to_string(),
            backup_regions: vec!["us-west".to_string(), "eu-central".to_string()],
            ..FailoverConfig::default()
        })))
    }

    #[test]
    fn test_trigger_variants() {
        let operator = operator(true);

        assert_eq!(operator.trigger(None, "drill").unwrap(), "us-west");
        assert_eq!(operator.trigger(Some("primary"), "drill").unwrap(), "us-east");
        assert_eq!(operator.trigger(Some("eu-central"), "drill").unwrap(), "eu-central");
        assert_eq!(operator.trigger(Some(""), "drill").unwrap(), "us-east");
        assert_eq!(operator.trigger(Some("us-east"), "drill").unwrap(), "us-east");
    }

    #[test]
    fn test_unknown_region_is_rejected() {
        let err = operator(true).trigger(Some("mars-1"), "drill").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_disabled_returns_precondition_failed() {
        let operator = operator(false);
        for region in [None, Some("primary"), Some("us-west")] {
            let err = operator.trigger(region, "drill").unwrap_err();
            assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
        }
    }
}
