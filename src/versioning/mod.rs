//! # Versioning Module
//!
//! Per-tenant API version preferences.

pub mod resolver;

pub use resolver::{
    is_version_segment, normalize_resource, rewrite_version_segment, VersionPreferenceResolver,
};
