//! # Failover Module
//!
//! Active-region tracking with automatic and operator-driven failover.

pub mod coordinator;
pub mod operator;

pub use coordinator::{
    FailureCause, RegionFailoverCoordinator, RegionSnapshot, RegionState, UpstreamOutcome,
};
pub use operator::{region_admin_router, FailoverOperator, FailoverRequest, FailoverResponse};
