//! Region Failover Coordinator
//!
//! Tracks the active backend region and moves it to a backup after repeated failures.
//!
//! ## States
//! - **disabled**: pass-through; the primary is always reported and nothing is recorded
//! - **primary-active**: normal operation
//! - **backup-active**: entered automatically or by an operator; sticky until
//!   [`RegionFailoverCoordinator::restore_primary`] is called
//!
//! ## Concurrency
//! Region state is an immutable [`RegionState`] behind an `ArcSwap`. Every mutation is a
//! compare-and-swap of a whole new state: failure recording retries until its increment
//! lands, so no failure is ever lost, while region transitions try once and a loser
//! reports the region that won. Nothing here awaits, so no lock is ever held across the
//! upstream call.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::config::FailoverConfig;
use crate::observability::metrics::{REGION_FAILOVERS, REGION_FAILURES};

/// Why a failure was recorded against the active region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Upstream answered with a 5xx status
    UpstreamStatus(u16),

    /// Connection refused, reset, DNS failure, ...
    Transport(String),

    Timeout,

    /// Reported by the cache/connection layer rather than the proxy stage
    CacheConnection(String),
}

impl FailureCause {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpstreamStatus(_) => "upstream_status",
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::CacheConnection(_) => "cache_connection",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamStatus(status) => write!(f, "upstream returned {}", status),
            Self::Transport(message) => write!(f, "transport error: {}", message),
            Self::Timeout => write!(f, "upstream timed out"),
            Self::CacheConnection(message) => write!(f, "cache connection error: {}", message),
        }
    }
}

/// Completion report from the proxy stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamOutcome {
    Success(u16),
    UpstreamError(u16),
    TransportError(String),
    TimedOut,
}

impl UpstreamOutcome {
    /// Classify a response status
    pub fn from_status(status: u16) -> Self {
        if (500..600).contains(&status) {
            Self::UpstreamError(status)
        } else {
            Self::Success(status)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::UpstreamError(_) => "upstream_error",
            Self::TransportError(_) => "transport_error",
            Self::TimedOut => "timeout",
        }
    }

    /// The failure this outcome represents, if any
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            Self::Success(_) => None,
            Self::UpstreamError(status) => Some(FailureCause::UpstreamStatus(*status)),
            Self::TransportError(message) => Some(FailureCause::Transport(message.clone())),
            Self::TimedOut => Some(FailureCause::Timeout),
        }
    }
}

/// Mutable region state; replaced wholesale on every change
#[derive(Debug, Clone, PartialEq)]
pub struct RegionState {
    pub active_region: String,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

/// Point-in-time view for the operator surface
#[derive(Debug, Clone, Serialize)]
pub struct RegionSnapshot {
    pub enabled: bool,
    pub active_region: String,
    pub primary_region: String,
    pub backup_regions: Vec<String>,
    pub on_primary: bool,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub seconds_since_last_failure: Option<u64>,
}

/// Owner of the active region
pub struct RegionFailoverCoordinator {
    config: FailoverConfig,
    state: ArcSwap<RegionState>,
}

impl RegionFailoverCoordinator {
    pub fn new(config: FailoverConfig) -> Self {
        if let Some(e) = config.misconfiguration() {
            warn!(error = %e, "Region failover degraded");
        }

        let state = RegionState {
            active_region: config.primary_region.clone(),
            failure_count: 0,
            last_failure: None,
        };

        Self {
            config,
            state: ArcSwap::from_pointee(state),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// The active region name
    pub fn current_region(&self) -> String {
        if !self.config.enabled {
            return self.config.primary_region.clone();
        }
        self.state.load().active_region.clone()
    }

    /// Record one failure against the active region
    ///
    /// A gap longer than the failure window since the previous failure restarts the count.
    /// Reaching the threshold fails over within the same state swap. Returns the active
    /// region afterwards.
    pub fn record_failure(&self, cause: FailureCause) -> String {
        if !self.config.enabled {
            return self.config.primary_region.clone();
        }

        metrics::counter!(REGION_FAILURES, "cause" => cause.label()).increment(1);
        let now = Instant::now();

        loop {
            let current = self.state.load_full();
            let (next, failover_to) = self.after_failure(&current, now);
            let next = Arc::new(next);

            let previous = self.state.compare_and_swap(&current, Arc::clone(&next));
            if !Arc::ptr_eq(&*previous, &current) {
                continue;
            }

            debug!(
                region = %current.active_region,
                failures = next.failure_count,
                cause = %cause,
                "Region failure recorded"
            );

            if let Some(target) = failover_to {
                warn!(
                    from = %current.active_region,
                    to = %target,
                    cause = %cause,
                    threshold = self.config.failure_threshold,
                    "Failure threshold reached, failing over"
                );
                metrics::counter!(REGION_FAILOVERS, "trigger" => "automatic").increment(1);
            }
            return next.active_region.clone();
        }
    }

    /// Zero the failure counter without touching the active region
    pub fn reset_failures(&self) {
        if !self.config.enabled {
            return;
        }

        self.state.rcu(|state| {
            if state.failure_count == 0 {
                Arc::clone(state)
            } else {
                Arc::new(RegionState {
                    failure_count: 0,
                    ..RegionState::clone(state)
                })
            }
        });
    }

    /// Translate a proxy-stage completion into `record_failure` / `reset_failures`
    pub fn observe(&self, outcome: &UpstreamOutcome) {
        match outcome.failure_cause() {
            Some(cause) => {
                self.record_failure(cause);
            }
            None => self.reset_failures(),
        }
    }

    /// Move to the first backup that differs from the active region
    ///
    /// While a backup is already active this returns it unchanged, so repeated calls
    /// never oscillate. Without any backup configured the active region is returned
    /// unchanged. A lost race returns the region that won.
    pub fn trigger_failover(&self, reason: &str) -> String {
        if !self.config.enabled {
            return self.config.primary_region.clone();
        }

        let current = self.state.load_full();
        if current.active_region != self.config.primary_region {
            debug!(region = %current.active_region, reason, "Backup region already active");
            return current.active_region.clone();
        }

        let target = match self.first_backup(&current.active_region) {
            Some(target) => target.to_string(),
            None => {
                warn!(
                    region = %current.active_region,
                    reason,
                    "Failover requested but no backup region is configured"
                );
                return current.active_region.clone();
            }
        };

        self.transition(&current, target, reason, "operator")
    }

    /// Move to a specific configured region
    pub fn failover_to(&self, region: &str, reason: &str) -> String {
        if !self.config.enabled {
            return self.config.primary_region.clone();
        }

        let current = self.state.load_full();
        if current.active_region == region {
            return current.active_region.clone();
        }
        self.transition(&current, region.to_string(), reason, "operator")
    }

    /// Make the primary active again and reset the counter
    pub fn restore_primary(&self, reason: &str) -> String {
        if !self.config.enabled {
            return self.config.primary_region.clone();
        }

        let primary = self.config.primary_region.clone();
        let previous = self.state.rcu(|state| RegionState {
            active_region: primary.clone(),
            failure_count: 0,
            last_failure: state.last_failure,
        });

        if previous.active_region != primary {
            info!(from = %previous.active_region, to = %primary, reason, "Primary region restored");
            metrics::counter!(REGION_FAILOVERS, "trigger" => "restore").increment(1);
        }
        primary
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        let state = self.state.load();
        let active_region = if self.config.enabled {
            state.active_region.clone()
        } else {
            self.config.primary_region.clone()
        };

        RegionSnapshot {
            enabled: self.config.enabled,
            on_primary: active_region == self.config.primary_region,
            active_region,
            primary_region: self.config.primary_region.clone(),
            backup_regions: self.config.backup_regions.clone(),
            failure_count: state.failure_count,
            failure_threshold: self.config.failure_threshold,
            seconds_since_last_failure: state.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }

    fn first_backup(&self, active: &str) -> Option<&str> {
        self.config
            .backup_regions
            .iter()
            .map(String::as_str)
            .find(|region| *region != active)
    }

    /// Next state after one failure, plus the region failed over to
    fn after_failure(&self, state: &RegionState, now: Instant) -> (RegionState, Option<String>) {
        let window_expired = state
            .last_failure
            .map_or(false, |last| now.saturating_duration_since(last) > self.config.failure_window);
        let previous_count = if window_expired { 0 } else { state.failure_count };
        let count = previous_count + 1;

        if count < self.config.failure_threshold {
            return (
                RegionState {
                    active_region: state.active_region.clone(),
                    failure_count: count,
                    last_failure: Some(now),
                },
                None,
            );
        }

        // Threshold reached: the count is consumed whether or not a move happens
        let on_primary = state.active_region == self.config.primary_region;
        let target = if on_primary {
            self.first_backup(&state.active_region).map(str::to_string)
        } else {
            None
        };
        if target.is_none() {
            debug!(
                region = %state.active_region,
                "Failure threshold reached with no failover target"
            );
        }

        (
            RegionState {
                active_region: target.clone().unwrap_or_else(|| state.active_region.clone()),
                failure_count: 0,
                last_failure: Some(now),
            },
            target,
        )
    }

    /// Compare-and-swap from `current`'s region to `target`
    ///
    /// Counter-only updates made in between are retried over. Another region transition
    /// wins the race, and the loser reports the winner.
    fn transition(
        &self,
        current: &Arc<RegionState>,
        target: String,
        reason: &str,
        trigger: &'static str,
    ) -> String {
        let mut current = Arc::clone(current);
        loop {
            let next = Arc::new(RegionState {
                active_region: target.clone(),
                failure_count: 0,
                last_failure: current.last_failure,
            });

            let previous = self.state.compare_and_swap(&current, next);
            if Arc::ptr_eq(&*previous, &current) {
                break;
            }
            if previous.active_region != current.active_region {
                let winner = previous.active_region.clone();
                info!(attempted = %target, winner = %winner, reason, "Region transition lost a race");
                return winner;
            }
            current = Arc::clone(&*previous);
        }

        warn!(from = %current.active_region, to = %target, reason, "Region failover");
        metrics::counter!(REGION_FAILOVERS, "trigger" => trigger).increment(1);
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(backups: &[&str]) -> FailoverConfig {
        FailoverConfig {
            enabled: true,
            primary_region: "us-east".to_string(),
            backup_regions: backups.iter().map(|b| b.to_string()).collect(),
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            ..FailoverConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_within_window_fail_over() {
        let coordinator = RegionFailoverCoordinator::new(config(&["us-west", "eu-central"]));

        coordinator.record_failure(FailureCause::UpstreamStatus(503));
        tokio::time::advance(Duration::from_secs(20)).await;
        coordinator.record_failure(FailureCause::Timeout);
        tokio::time::advance(Duration::from_secs(20)).await;
        let region = coordinator.record_failure(FailureCause::Transport("reset".into()));

        assert_eq!(region, "us-west");
        assert_eq!(coordinator.current_region(), "us-west");
        assert_eq!(coordinator.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spread_out_failures_reset_the_window() {
        let coordinator = RegionFailoverCoordinator::new(config(&["us-west"]));

        for _ in 0..3 {
            coordinator.record_failure(FailureCause::UpstreamStatus(500));
            tokio::time::advance(Duration::from_secs(61)).await;
        }

        assert_eq!(coordinator.current_region(), "us-east");
        assert_eq!(coordinator.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_success_resets_counter_only() {
        let coordinator = RegionFailoverCoordinator::new(config(&["us-west"]));
        coordinator.observe(&UpstreamOutcome::from_status(502));
        coordinator.observe(&UpstreamOutcome::TimedOut);
        assert_eq!(coordinator.snapshot().failure_count, 2);

        coordinator.observe(&UpstreamOutcome::from_status(404));
        assert_eq!(coordinator.snapshot().failure_count, 0);
        assert_eq!(coordinator.current_region(), "us-east");
    }

    #[test]
    fn test_trigger_is_idempotent_and_restore_returns_primary() {
        let coordinator = RegionFailoverCoordinator::new(config(&["us-west", "eu-central"]));

        assert_eq!(coordinator.trigger_failover("drill"), "us-west");
        assert_eq!(coordinator.trigger_failover("drill"), "us-west");

        assert_eq!(coordinator.restore_primary("drill over"), "us-east");
        assert_eq!(coordinator.restore_primary("drill over"), "us-east");
        assert_eq!(coordinator.current_region(), "us-east");
    }

    #[test]
    fn test_backup_equal_to_primary_is_skipped() {
        let coordinator = RegionFailoverCoordinator::new(config(&["us-east", "us-west"]));
        assert_eq!(coordinator.trigger_failover("drill"), "us-west");
    }

    #[test]
    fn test_no_backups_keeps_region() {
        let coordinator = RegionFailoverCoordinator::new(config(&[]));
        assert_eq!(coordinator.trigger_failover("drill"), "us-east");

        for _ in 0..5 {
            assert_eq!(coordinator.record_failure(FailureCause::Timeout), "us-east");
        }
    }

    #[test]
    fn test_disabled_is_pass_through() {
        let coordinator = RegionFailoverCoordinator::new(FailoverConfig {
            enabled: false,
            ..config(&["us-west"])
        });

        for _ in 0..10 {
            coordinator.record_failure(FailureCause::UpstreamStatus(500));
        }
        assert_eq!(coordinator.trigger_failover("drill"), "us-east");
        assert_eq!(coordinator.current_region(), "us-east");
        assert_eq!(coordinator.snapshot().failure_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_not_lost() {
        let coordinator = Arc::new(RegionFailoverCoordinator::new(FailoverConfig {
            failure_threshold: 10_000,
            ..config(&["us-west"])
        }));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    for _ in 0..250 {
                        coordinator.record_failure(FailureCause::UpstreamStatus(500));
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(coordinator.snapshot().failure_count, 2000);
    }

    #[test]
    fn test_operator_failover_survives_concurrent_failure_counting() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let coordinator = Arc::new(RegionFailoverCoordinator::new(FailoverConfig {
            failure_threshold: u32::MAX,
            ..config(&["us-west"])
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let counters: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        coordinator.record_failure(FailureCause::UpstreamStatus(503));
                    }
                })
            })
            .collect();

        for _ in 0..5_000 {
            coordinator.restore_primary("drill over");
            assert_eq!(coordinator.trigger_failover("drill"), "us-west");
        }

        stop.store(true, Ordering::Relaxed);
        for counter in counters {
            counter.join().unwrap();
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(UpstreamOutcome::from_status(200).failure_cause(), None);
        assert_eq!(UpstreamOutcome::from_status(499).failure_cause(), None);
        assert_eq!(
            UpstreamOutcome::from_status(503).failure_cause(),
            Some(FailureCause::UpstreamStatus(503))
        );
        assert_eq!(UpstreamOutcome::TimedOut.failure_cause(), Some(FailureCause::Timeout));
    }
}
