//! # Routing Module
//!
//! The route source: definitions loaded from the store, compiled predicates and
//! filters, upstream target resolution and the refresh path.
//!
//! ```text
//! RouteRow ──► RouteDefinition ──► ResolvedRoute ──► RouteSource::find ──► RouteMatch
//!  (store)      (generic form)     (compiled, target)   (per request)
//! ```

pub mod definition;
pub mod filter;
pub mod predicate;
pub mod refresh;
pub mod resolver;
pub mod source;

pub use definition::{
    BlueGreenSlot, DeploymentMetadata, FilterDefinition, NamedArgs, PredicateDefinition,
    RouteConversionError, RouteDefinition, Slot, TrafficSplit,
};
pub use refresh::{spawn_redis_bridge, spawn_refresh_listener, RefreshSignal};
pub use resolver::{ResolvedRoute, UpstreamTarget, WeightedTarget};
pub use source::{RouteList, RouteMatch, RouteSource};
