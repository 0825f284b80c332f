//! # Error Handling Module
//!
//! This module defines the error taxonomy of the edge control plane using the `thiserror` crate.
//! Every component in front of the proxy stage is designed to degrade silently, so most of these
//! variants only ever reach logs. The ones that do reach a client carry a proper HTTP status.
//!
//! ## Taxonomy
//! - **Store unavailable**: the relational store or distributed cache could not be reached.
//!   Callers fall back to a safe default (stale cache, empty route set, "no preference").
//! - **Policy rejection**: a CORS preflight was refused. Surfaced as `403`, never cached.
//! - **Misconfiguration**: e.g. failover enabled without backup regions. Logged, never returned
//!   from the request path.
//! - **Precondition failed**: an operator tried to drive failover while it is disabled.
//!
//! A lost race between two region transitions is not an error at all; the loser simply
//! reports the region that won.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the control plane
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Error types for the edge control plane
///
/// The `#[error("...")]` attribute from `thiserror` implements `Display`
/// with the given message.
#[derive(Debug, Error, Clone)]
pub enum ControlPlaneError {
    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A backing store (relational store, distributed cache) is unreachable
    #[error("Store unavailable: {store} - {reason}")]
    StoreUnavailable { store: String, reason: String },

    /// CORS policy refused the preflight
    #[error("Policy rejection: {reason}")]
    PolicyRejection { reason: String },

    /// Configuration is accepted but cannot support the requested behavior
    #[error("Misconfiguration: {message}")]
    Misconfiguration { message: String },

    /// The operation is not available in the current state
    #[error("Precondition failed: {reason}")]
    PreconditionFailed { reason: String },

    /// Operator input that cannot be applied
    #[error("Invalid request: {field} - {reason}")]
    InvalidRequest { field: String, reason: String },

    /// No enabled route matched the request
    #[error("No route matched: {method} {path}")]
    NoRoute { method: String, path: String },

    /// Upstream call failed at the transport level
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// Upstream call exceeded the configured timeout
    #[error("Upstream timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Internal server errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl ControlPlaneError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a store-unavailable error
    pub fn store_unavailable<S: Into<String>, R: Into<String>>(store: S, reason: R) -> Self {
        Self::StoreUnavailable {
            store: store.into(),
            reason: reason.into(),
        }
    }

    /// Create a CORS policy rejection
    pub fn policy_rejection<S: Into<String>>(reason: S) -> Self {
        Self::PolicyRejection {
            reason: reason.into(),
        }
    }

    pub fn misconfiguration<S: Into<String>>(message: S) -> Self {
        Self::Misconfiguration {
            message: message.into(),
        }
    }

    pub fn precondition_failed<S: Into<String>>(reason: S) -> Self {
        Self::PreconditionFailed {
            reason: reason.into(),
        }
    }

    pub fn invalid_request<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code a client should see for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PolicyRejection { .. } => StatusCode::FORBIDDEN,
            Self::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NoRoute { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. }
            | Self::Misconfiguration { .. }
            | Self::Internal { .. }
            | Self::Io { .. }
            | Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::PolicyRejection { .. } => "policy_rejection",
            Self::Misconfiguration { .. } => "misconfiguration",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::NoRoute { .. } => "no_route",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<Infallible> for ControlPlaneError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for ControlPlaneError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ControlPlaneError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ControlPlaneError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ControlPlaneError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream {
            message: err.to_string(),
        }
    }
}

/// Render errors as structured JSON so axum handlers can return them directly
impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ControlPlaneError::policy_rejection("origin not allowed").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ControlPlaneError::precondition_failed("failover disabled").status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ControlPlaneError::NoRoute {
                method: "GET".to_string(),
                path: "/nowhere".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_error_type_strings() {
        assert_eq!(
            ControlPlaneError::misconfiguration("no backups").error_type(),
            "misconfiguration"
        );
        assert_eq!(
            ControlPlaneError::config("bad ttl").to_string(),
            "Configuration error: bad ttl"
        );
    }
}
