//! # Route Resolution
//!
//! Turns a [`RouteDefinition`] into a [`ResolvedRoute`]: compiled predicates and filters,
//! an effective upstream target and a flattened read-only attribute map.
//!
//! Target precedence: traffic split, then the active blue-green slot, then the plain URI.

use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

use super::definition::{RouteConversionError, RouteDefinition};
use super::filter::RouteFilter;
use super::predicate::RoutePredicate;

/// Schemes a target may use; `lb` names a logical service
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "lb"];

/// One variant of a weighted target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedTarget {
    pub variant_id: String,
    pub weight: u32,
    pub uri: String,
}

/// Where a matched request is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamTarget {
    Fixed(String),

    /// Traffic-split variants with positive weights
    Weighted(Vec<WeightedTarget>),
}

/// The target chosen for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTarget<'a> {
    pub uri: &'a str,
    pub variant_id: Option<&'a str>,
}

impl UpstreamTarget {
    /// Pick the target for one request; `None` only for an empty variant list
    pub fn select(&self) -> Option<SelectedTarget<'_>> {
        match self {
            Self::Fixed(_) => self.select_with(0),
            Self::Weighted(_) => {
                let total = self.total_weight();
                if total == 0 {
                    return None;
                }
                self.select_with(fastrand::u32(0..total))
            }
        }
    }

    /// Deterministic selection for a roll in `0..total_weight()`
    ///
    /// Weights summing to less than 100 are normalised over their total, so a weighted
    /// target always resolves to one of its variants.
    pub fn select_with(&self, roll: u32) -> Option<SelectedTarget<'_>> {
        match self {
            Self::Fixed(uri) => Some(SelectedTarget {
                uri,
                variant_id: None,
            }),
            Self::Weighted(variants) => {
                let mut cumulative = 0u64;
                variants.iter().find_map(|variant| {
                    cumulative += u64::from(variant.weight);
                    (u64::from(roll) < cumulative).then(|| SelectedTarget {
                        uri: &variant.uri,
                        variant_id: Some(&variant.variant_id),
                    })
                })
            }
        }
    }

    pub fn total_weight(&self) -> u32 {
        match self {
            Self::Fixed(_) => 0,
            Self::Weighted(variants) => variants
                .iter()
                .fold(0u32, |total, v| total.saturating_add(v.weight)),
        }
    }

    /// Every URI this target may resolve to
    pub fn uris(&self) -> Vec<&str> {
        match self {
            Self::Fixed(uri) => vec![uri.as_str()],
            Self::Weighted(variants) => variants.iter().map(|v| v.uri.as_str()).collect(),
        }
    }
}

/// An enabled route that passed conversion and has a non-empty target
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub definition: RouteDefinition,
    pub target: UpstreamTarget,
    pub predicates: Vec<RoutePredicate>,
    pub filters: Vec<RouteFilter>,

    /// Deployment metadata flattened to dotted keys
    pub attributes: BTreeMap<String, String>,
}

impl ResolvedRoute {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Resolve a definition
    ///
    /// `Ok(None)` means the route has no usable target; the caller skips it with a
    /// warning. `Err` means the row is malformed.
    pub fn resolve(definition: RouteDefinition) -> Result<Option<Self>, RouteConversionError> {
        let predicates = definition
            .predicates
            .iter()
            .map(RoutePredicate::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let filters = definition
            .filters
            .iter()
            .map(RouteFilter::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let target = match effective_target(&definition) {
            Some(target) => target,
            None => return Ok(None),
        };
        for uri in target.uris() {
            validate_uri(uri)?;
        }

        let mut attributes = BTreeMap::new();
        if let Some(raw) = &definition.raw_metadata {
            flatten_into(&mut attributes, "", raw);
        }

        Ok(Some(Self {
            definition,
            target,
            predicates,
            filters,
            attributes,
        }))
    }
}

fn effective_target(definition: &RouteDefinition) -> Option<UpstreamTarget> {
    if let Some(metadata) = &definition.metadata {
        let variants: Vec<WeightedTarget> = metadata
            .traffic_splits
            .iter()
            .filter(|split| split.weight > 0 && !split.uri.trim().is_empty())
            .map(|split| WeightedTarget {
                variant_id: split.variant_id.clone(),
                weight: split.weight,
                uri: split.uri.trim().to_string(),
            })
            .collect();
        if !variants.is_empty() {
            return Some(UpstreamTarget::Weighted(variants));
        }

        if let Some(uri) = metadata.blue_green.as_ref().and_then(|bg| bg.active_uri()) {
            return Some(UpstreamTarget::Fixed(uri.to_string()));
        }
    }

    definition.uri.clone().map(UpstreamTarget::Fixed)
}

fn validate_uri(uri: &str) -> Result<(), RouteConversionError> {
    let invalid = |reason: String| RouteConversionError::InvalidUri {
        uri: uri.to_string(),
        reason,
    };

    let parsed = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Flatten a JSON document into `a.b.0.c` style keys
fn flatten_into(out: &mut BTreeMap<String, String>, prefix: &str, value: &Value) {
    let key = |suffix: &str| {
        if prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}.{}", prefix, suffix)
        }
    };

    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (name, child) in map {
                flatten_into(out, &key(name), child);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(out, &key(&index.to_string()), child);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}
