//! # Route Filters
//!
//! Typed request transformations applied to the outbound request once a route matched.

use regex::Regex;
use std::collections::HashMap;

use super::definition::{FilterDefinition, RouteConversionError};

const KIND: &str = "filter";

/// Outbound request edits accumulated by the filter chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundEdits {
    pub path: String,
    pub add_headers: Vec<(String, String)>,
    pub remove_headers: Vec<String>,
}

impl OutboundEdits {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// A compiled request transformation
#[derive(Debug, Clone)]
pub enum RouteFilter {
    /// Drop the first `parts` path segments
    StripPrefix { parts: usize },

    /// Prepend a fixed prefix
    PrefixPath { prefix: String },

    /// Regex replacement on the path
    RewritePath { pattern: Regex, replacement: String },

    /// Replace the path with a template; `{var}` is filled from path captures
    SetPath { template: String },

    AddRequestHeader { name: String, value: String },

    RemoveRequestHeader { name: String },
}

impl RouteFilter {
    /// Compile a generic definition; unknown names make the whole route malformed
    pub fn compile(definition: &FilterDefinition) -> Result<Self, RouteConversionError> {
        match definition.name.to_ascii_lowercase().as_str() {
            "stripprefix" => {
                let raw = definition.required(KIND, "parts", 0)?;
                let parts = raw.parse().map_err(|_| RouteConversionError::InvalidEntry {
                    kind: KIND,
                    reason: format!("StripPrefix parts '{}' is not a number", raw),
                })?;
                Ok(Self::StripPrefix { parts })
            }
            "prefixpath" => {
                let prefix = definition.required(KIND, "prefix", 0)?;
                if !prefix.starts_with('/') {
                    return Err(RouteConversionError::InvalidEntry {
                        kind: KIND,
                        reason: format!("PrefixPath prefix '{}' must start with '/'", prefix),
                    });
                }
                Ok(Self::PrefixPath {
                    prefix: prefix.trim_end_matches('/').to_string(),
                })
            }
            "rewritepath" => {
                let raw = definition.required(KIND, "regexp", 0)?;
                let pattern = Regex::new(raw).map_err(|e| RouteConversionError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                })?;
                // "$\{segment}" is the escaped form some admin tools write
                let replacement = definition
                    .arg("replacement", 1)
                    .unwrap_or_default()
                    .replace("$\\", "$");
                Ok(Self::RewritePath {
                    pattern,
                    replacement,
                })
            }
            "setpath" => Ok(Self::SetPath {
                template: definition.required(KIND, "template", 0)?.to_string(),
            }),
            "addrequestheader" => Ok(Self::AddRequestHeader {
                name: definition.required(KIND, "name", 0)?.to_string(),
                value: definition.arg("value", 1).unwrap_or_default().to_string(),
            }),
            "removerequestheader" => Ok(Self::RemoveRequestHeader {
                name: definition.required(KIND, "name", 0)?.to_string(),
            }),
            _ => Err(RouteConversionError::UnknownName {
                kind: KIND,
                name: definition.name.clone(),
            }),
        }
    }

    pub fn apply(&self, edits: &mut OutboundEdits, variables: &HashMap<String, String>) {
        match self {
            Self::StripPrefix { parts } => {
                let remaining: Vec<&str> = edits
                    .path
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .skip(*parts)
                    .collect();
                let trailing = edits.path.ends_with('/') && !remaining.is_empty();
                edits.path = format!("/{}", remaining.join("/"));
                if trailing {
                    edits.path.push('/');
                }
            }
            Self::PrefixPath { prefix } => {
                edits.path = format!("{}{}", prefix, edits.path);
            }
            Self::RewritePath {
                pattern,
                replacement,
            } => {
                edits.path = pattern
                    .replace(&edits.path, replacement.as_str())
                    .into_owned();
            }
            Self::SetPath { template } => {
                let mut path = template.clone();
                for (name, value) in variables {
                    path = path.replace(&format!("{{{}}}", name), value);
                }
                edits.path = path;
            }
            Self::AddRequestHeader { name, value } => {
                edits.add_headers.push((name.clone(), value.clone()));
            }
            Self::RemoveRequestHeader { name } => {
                edits.remove_headers.push(name.to_ascii_lowercase());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::definition::NamedArgs;

    fn apply(filter: &NamedArgs, path: &str) -> OutboundEdits {
        let mut edits = OutboundEdits::new(path);
        RouteFilter::compile(filter)
            .unwrap()
            .apply(&mut edits, &HashMap::new());
        edits
    }

    #[test]
    fn test_strip_prefix() {
        let filter = NamedArgs::new("StripPrefix").with_arg("_genkey_0", "2");
        assert_eq!(apply(&filter, "/api/orders/42").path, "/42");
        assert_eq!(apply(&filter, "/api/orders").path, "/");
    }

    #[test]
    fn test_prefix_and_rewrite() {
        let prefix = NamedArgs::new("PrefixPath").with_arg("prefix", "/internal/");
        assert_eq!(apply(&prefix, "/orders").path, "/internal/orders");

        let rewrite = NamedArgs::new("RewritePath")
            .with_arg("_genkey_0", "/api/(?P<segment>.*)")
            .with_arg("_genkey_1", "/$\\{segment}");
        assert_eq!(apply(&rewrite, "/api/orders/1").path, "/orders/1");
    }

    #[test]
    fn test_set_path_uses_captures() {
        let filter = RouteFilter::compile(
            &NamedArgs::new("SetPath").with_arg("template", "/v2/accounts/{id}"),
        )
        .unwrap();
        let mut edits = OutboundEdits::new("/users/7");
        let variables = HashMap::from([("id".to_string(), "7".to_string())]);
        filter.apply(&mut edits, &variables);
        assert_eq!(edits.path, "/v2/accounts/7");
    }

    #[test]
    fn test_header_edits() {
        let add = NamedArgs::new("AddRequestHeader")
            .with_arg("_genkey_0", "X-Source")
            .with_arg("_genkey_1", "edge");
        let edits = apply(&add, "/");
        assert_eq!(edits.add_headers, vec![("X-Source".to_string(), "edge".to_string())]);

        let remove = NamedArgs::new("RemoveRequestHeader").with_arg("name", "Cookie");
        assert_eq!(apply(&remove, "/").remove_headers, vec!["cookie".to_string()]);
    }

    #[test]
    fn test_invalid_filters() {
        assert!(RouteFilter::compile(&NamedArgs::new("StripPrefix").with_arg("parts", "two")).is_err());
        assert!(RouteFilter::compile(&NamedArgs::new("PrefixPath").with_arg("prefix", "x")).is_err());
        assert!(matches!(
            RouteFilter::compile(&NamedArgs::new("CircuitBreaker")),
            Err(RouteConversionError::UnknownName { .. })
        ));
    }
}
