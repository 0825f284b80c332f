//! # CORS Module
//!
//! Preflight recognition, policy evaluation and the decision cache.

pub mod policy;
pub mod preflight;

pub use policy::{normalize_origin, CorsHeaders, CorsPolicy, PreflightDecision};
pub use preflight::{
    normalize_requested_headers, PreflightCache, PreflightHandler, PreflightKey, PreflightResponse,
};
