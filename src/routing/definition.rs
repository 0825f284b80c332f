//! # Route Definitions
//!
//! Conversion of raw [`RouteRow`]s into route definitions: predicates and filters in the
//! generic name + argument-map form, plus typed deployment metadata (blue-green slot and
//! traffic split).
//!
//! Predicate and filter entries are accepted in two shapes:
//! - objects: `{"name": "Path", "args": {"pattern": "/api/**"}}`
//! - shorthand strings: `"Path=/api/**,/v2/**"` (positional args keyed `_genkey_N`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::store::RouteRow;

/// Reasons a single row cannot be turned into a routable definition
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouteConversionError {
    #[error("invalid {kind} entry: {reason}")]
    InvalidEntry { kind: &'static str, reason: String },

    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("{kind} '{name}' is missing argument '{arg}'")]
    MissingArgument {
        kind: &'static str,
        name: String,
        arg: String,
    },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid deployment metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("invalid target uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

const GENERATED_KEY_PREFIX: &str = "_genkey_";

/// Name plus argument map, shared by predicates and filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedArgs {
    pub name: String,
    pub args: BTreeMap<String, String>,
}

impl NamedArgs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Parse the `Name=arg1,arg2` shorthand
    fn parse_shorthand(kind: &'static str, text: &str) -> Result<Self, RouteConversionError> {
        let (name, args) = text
            .split_once('=')
            .ok_or_else(|| RouteConversionError::InvalidEntry {
                kind,
                reason: format!("'{}' is not of the form Name=args", text),
            })?;

        let name = name.trim();
        if name.is_empty() {
            return Err(RouteConversionError::InvalidEntry {
                kind,
                reason: format!("'{}' has an empty name", text),
            });
        }

        let mut named = NamedArgs::new(name);
        for (index, arg) in args.split(',').map(str::trim).enumerate() {
            named
                .args
                .insert(format!("{}{}", GENERATED_KEY_PREFIX, index), arg.to_string());
        }
        Ok(named)
    }

    fn parse_object(
        kind: &'static str,
        object: &serde_json::Map<String, Value>,
    ) -> Result<Self, RouteConversionError> {
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| RouteConversionError::InvalidEntry {
                kind,
                reason: "missing 'name'".to_string(),
            })?;

        let mut named = NamedArgs::new(name.trim());
        match object.get("args") {
            None | Some(Value::Null) => {}
            Some(Value::Object(args)) => {
                for (key, value) in args {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(RouteConversionError::InvalidEntry {
                                kind,
                                reason: format!("argument '{}' has unsupported value {}", key, other),
                            })
                        }
                    };
                    named.args.insert(key.clone(), value);
                }
            }
            Some(other) => {
                return Err(RouteConversionError::InvalidEntry {
                    kind,
                    reason: format!("'args' must be an object, got {}", other),
                })
            }
        }
        Ok(named)
    }

    /// Parse a JSON list of entries; `null` is an empty list
    pub fn parse_list(kind: &'static str, value: &Value) -> Result<Vec<Self>, RouteConversionError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(entries) => entries
                .iter()
                .map(|entry| match entry {
                    Value::String(text) => Self::parse_shorthand(kind, text),
                    Value::Object(object) => Self::parse_object(kind, object),
                    other => Err(RouteConversionError::InvalidEntry {
                        kind,
                        reason: format!("unsupported entry {}", other),
                    }),
                })
                .collect(),
            other => Err(RouteConversionError::InvalidEntry {
                kind,
                reason: format!("expected a list, got {}", other),
            }),
        }
    }

    /// Positional (`_genkey_N`) arguments in index order
    pub fn positional(&self) -> Vec<&str> {
        let mut indexed: Vec<(usize, &str)> = self
            .args
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(GENERATED_KEY_PREFIX)
                    .and_then(|index| index.parse().ok())
                    .map(|index| (index, value.as_str()))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, value)| value).collect()
    }

    /// A named argument, or the positional one at `position`
    pub fn arg(&self, named: &str, position: usize) -> Option<&str> {
        self.args
            .get(named)
            .map(String::as_str)
            .or_else(|| {
                self.args
                    .get(&format!("{}{}", GENERATED_KEY_PREFIX, position))
                    .map(String::as_str)
            })
            .filter(|v| !v.is_empty())
    }

    /// A list argument: every positional value, or a comma-separated named value
    pub fn list(&self, named: &[&str]) -> Vec<String> {
        let positional = self.positional();
        if !positional.is_empty() {
            return positional
                .into_iter()
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
        }

        named
            .iter()
            .filter_map(|key| self.args.get(*key))
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn required(
        &self,
        kind: &'static str,
        named: &str,
        position: usize,
    ) -> Result<&str, RouteConversionError> {
        self.arg(named, position)
            .ok_or_else(|| RouteConversionError::MissingArgument {
                kind,
                name: self.name.clone(),
                arg: named.to_string(),
            })
    }
}

/// Matching condition in generic form
pub type PredicateDefinition = NamedArgs;

/// Request transformation in generic form
pub type FilterDefinition = NamedArgs;

/// Which of the two parallel deployments receives traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Blue,
    Green,
}

/// Blue-green deployment slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenSlot {
    pub active: Slot,

    #[serde(default)]
    pub blue_uri: Option<String>,

    #[serde(default)]
    pub green_uri: Option<String>,
}

impl BlueGreenSlot {
    /// URI of the active slot, if configured and non-empty
    pub fn active_uri(&self) -> Option<&str> {
        let uri = match self.active {
            Slot::Blue => self.blue_uri.as_deref(),
            Slot::Green => self.green_uri.as_deref(),
        };
        uri.map(str::trim).filter(|u| !u.is_empty())
    }
}

/// One weighted canary variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSplit {
    pub variant_id: String,

    /// Percentage weight; all weights of a route sum to at most 100
    pub weight: u32,

    pub uri: String,
}

/// Deployment metadata attached to a route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    #[serde(default)]
    pub blue_green: Option<BlueGreenSlot>,

    #[serde(default)]
    pub traffic_splits: Vec<TrafficSplit>,
}

impl DeploymentMetadata {
    fn parse(value: &Value) -> Result<Option<Self>, RouteConversionError> {
        if value.is_null() {
            return Ok(None);
        }

        let metadata: DeploymentMetadata = serde_json::from_value(value.clone()).map_err(|e| {
            RouteConversionError::InvalidMetadata {
                reason: e.to_string(),
            }
        })?;

        let total = metadata
            .traffic_splits
            .iter()
            .try_fold(0u32, |total, split| total.checked_add(split.weight));
        match total {
            Some(total) if total <= 100 => {}
            Some(total) => {
                return Err(RouteConversionError::InvalidMetadata {
                    reason: format!("traffic split weights sum to {} (max 100)", total),
                });
            }
            None => {
                return Err(RouteConversionError::InvalidMetadata {
                    reason: "traffic split weights overflow".to_string(),
                });
            }
        }

        Ok(Some(metadata))
    }
}

/// A route row converted into its generic definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDefinition {
    pub id: String,
    pub predicates: Vec<PredicateDefinition>,
    pub filters: Vec<FilterDefinition>,
    pub uri: Option<String>,
    pub path_pattern: Option<String>,
    pub enabled: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<DeploymentMetadata>,

    /// Raw metadata document, kept for attribute flattening
    #[serde(skip)]
    pub raw_metadata: Option<Value>,
}

impl RouteDefinition {
    /// Convert a raw row; the row's `path_pattern` becomes an implicit `Path`
    /// predicate when no explicit one is present
    pub fn from_row(row: &RouteRow) -> Result<Self, RouteConversionError> {
        let mut predicates = NamedArgs::parse_list("predicate", &row.predicates)?;
        let filters = NamedArgs::parse_list("filter", &row.filters)?;

        let path_pattern = row
            .path_pattern
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        if let Some(pattern) = &path_pattern {
            if !predicates.iter().any(|p| p.name.eq_ignore_ascii_case("Path")) {
                predicates.insert(0, NamedArgs::new("Path").with_arg("_genkey_0", pattern.clone()));
            }
        }

        let metadata = match &row.metadata {
            Some(value) => DeploymentMetadata::parse(value)?,
            None => None,
        };

        Ok(Self {
            id: row.id.clone(),
            predicates,
            filters,
            uri: row
                .uri
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            path_pattern,
            enabled: row.enabled,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            metadata,
            raw_metadata: row.metadata.clone().filter(|m| !m.is_null()),
        })
    }
}
