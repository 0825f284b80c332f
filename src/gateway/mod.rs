//! # Gateway Module
//!
//! Composition of the control plane stages and the axum server in front of them.

pub mod pipeline;
pub mod server;

pub use pipeline::{EdgePipeline, PipelineDecision, PipelineSettings, UpstreamRequest};
pub use server::{build_app, serve, AppState};
