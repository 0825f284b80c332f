//! # Edge Control Plane Library
//!
//! The decision layer in front of a multi-tenant API gateway's proxy stage. For every
//! inbound request it answers four questions:
//!
//! - which region is active (`failover`)
//! - which API version the tenant prefers (`versioning`)
//! - whether a CORS preflight can be answered from cache (`cors`)
//! - which upstream the request goes to (`routing`)
//!
//! All four components are read-mostly and cache-fronted; once warm, none of them waits
//! on an external store while serving a request.

/// Error types, configuration and request-scoped types shared by every module
pub mod core;

/// Narrow read interfaces to the relational store, with memory and PostgreSQL backends
pub mod store;

/// Route loading, resolution, matching and refresh signalling
pub mod routing;

/// Active-region tracking with automatic and operator-driven failover
pub mod failover;

/// CORS policy evaluation and the preflight decision cache
pub mod cors;

/// Per-tenant API version preferences
pub mod versioning;

/// Structured logging and Prometheus metrics
pub mod observability;

/// The composed request pipeline and the axum server in front of it
pub mod gateway;

pub use core::config::ControlPlaneConfig;
pub use core::error::{ControlPlaneError, ControlPlaneResult};
pub use core::types::{InboundRequest, RequestContext};

pub use cors::{CorsPolicy, PreflightCache, PreflightHandler};
pub use failover::{RegionFailoverCoordinator, UpstreamOutcome};
pub use gateway::{EdgePipeline, PipelineDecision};
pub use routing::{RefreshSignal, RouteSource};
pub use versioning::VersionPreferenceResolver;
