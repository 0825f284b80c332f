//! # Route Predicates
//!
//! Typed, pre-compiled forms of the generic predicate definitions. Compilation happens
//! once per route load; matching runs on every request and never allocates regexes.

use regex::Regex;
use std::collections::HashMap;

use super::definition::{PredicateDefinition, RouteConversionError};
use crate::core::types::InboundRequest;

const KIND: &str = "predicate";

/// Ant-style path pattern: `*` matches within a segment, `**` across segments,
/// `{name}` captures one segment
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, RouteConversionError> {
        if !pattern.starts_with('/') {
            return Err(RouteConversionError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "path patterns must start with '/'".to_string(),
            });
        }

        let mut source = String::from("^");
        let mut rest = pattern;
        while !rest.is_empty() {
            if rest == "/**" {
                source.push_str("(?:/.*)?");
                rest = "";
            } else if let Some(after) = rest.strip_prefix("**") {
                source.push_str(".*");
                rest = after;
            } else if let Some(after) = rest.strip_prefix('*') {
                source.push_str("[^/]*");
                rest = after;
            } else if let Some(after) = rest.strip_prefix('{') {
                let end = after.find('}').ok_or_else(|| RouteConversionError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "unclosed '{'".to_string(),
                })?;
                let name = &after[..end];
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(RouteConversionError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: format!("invalid variable name '{}'", name),
                    });
                }
                source.push_str(&format!("(?P<{}>[^/]+)", name));
                rest = &after[end + 1..];
            } else {
                let next = rest.find(&['*', '{'][..]).unwrap_or(rest.len());
                // A trailing "/**" also matches the bare prefix
                let literal = if rest[..next].ends_with('/') && &rest[next..] == "**" {
                    &rest[..next - 1]
                } else {
                    &rest[..next]
                };
                source.push_str(&regex::escape(literal));
                rest = &rest[literal.len()..];
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| RouteConversionError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Named `{var}` captures of a matching path
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        Some(
            self.regex
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Compile an optional user-supplied regex argument
fn compile_regex(pattern: Option<&str>) -> Result<Option<Regex>, RouteConversionError> {
    pattern
        .map(|p| {
            Regex::new(&format!("^(?:{})$", p)).map_err(|e| RouteConversionError::InvalidPattern {
                pattern: p.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Host pattern: `*` matches one label, `**` any number of labels
fn compile_host_pattern(pattern: &str) -> Result<Regex, RouteConversionError> {
    let mut source = String::from("(?i)^");
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("**") {
            source.push_str(".*");
            rest = after;
        } else if let Some(after) = rest.strip_prefix('*') {
            source.push_str("[^.]*");
            rest = after;
        } else {
            let next = rest.find('*').unwrap_or(rest.len());
            source.push_str(&regex::escape(&rest[..next]));
            rest = &rest[next..];
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| RouteConversionError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// A compiled matching condition
#[derive(Debug, Clone)]
pub enum RoutePredicate {
    /// Any of the patterns matches the request path
    Path(Vec<PathPattern>),

    /// Request method is one of these (upper-case)
    Method(Vec<String>),

    /// Header is present, optionally with a value matching the regex
    Header { name: String, value: Option<Regex> },

    /// Host header matches any of the patterns
    Host(Vec<Regex>),

    /// Query parameter is present, optionally with a value matching the regex
    Query { param: String, value: Option<Regex> },
}

impl RoutePredicate {
    /// Compile a generic definition; unknown names make the whole route malformed
    pub fn compile(definition: &PredicateDefinition) -> Result<Self, RouteConversionError> {
        match definition.name.to_ascii_lowercase().as_str() {
            "path" => {
                let patterns = definition.list(&["patterns", "pattern"]);
                if patterns.is_empty() {
                    return Err(RouteConversionError::MissingArgument {
                        kind: KIND,
                        name: definition.name.clone(),
                        arg: "patterns".to_string(),
                    });
                }
                let compiled = patterns
                    .iter()
                    .map(|p| PathPattern::compile(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Path(compiled))
            }
            "method" => {
                let methods: Vec<String> = definition
                    .list(&["methods", "method"])
                    .into_iter()
                    .map(|m| m.to_ascii_uppercase())
                    .collect();
                if methods.is_empty() {
                    return Err(RouteConversionError::MissingArgument {
                        kind: KIND,
                        name: definition.name.clone(),
                        arg: "methods".to_string(),
                    });
                }
                Ok(Self::Method(methods))
            }
            "header" => Ok(Self::Header {
                name: definition.required(KIND, "header", 0)?.to_ascii_lowercase(),
                value: compile_regex(definition.arg("regexp", 1))?,
            }),
            "host" => {
                let patterns = definition.list(&["patterns", "pattern"]);
                if patterns.is_empty() {
                    return Err(RouteConversionError::MissingArgument {
                        kind: KIND,
                        name: definition.name.clone(),
                        arg: "patterns".to_string(),
                    });
                }
                let compiled = patterns
                    .iter()
                    .map(|p| compile_host_pattern(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Host(compiled))
            }
            "query" => Ok(Self::Query {
                param: definition.required(KIND, "param", 0)?.to_string(),
                value: compile_regex(definition.arg("regexp", 1))?,
            }),
            _ => Err(RouteConversionError::UnknownName {
                kind: KIND,
                name: definition.name.clone(),
            }),
        }
    }

    pub fn matches(&self, request: &InboundRequest) -> bool {
        match self {
            Self::Path(patterns) => patterns.iter().any(|p| p.matches(&request.path)),
            Self::Method(methods) => methods.iter().any(|m| m == request.method.as_str()),
            Self::Header { name, value } => match request.header(name) {
                Some(actual) => value.as_ref().map_or(true, |re| re.is_match(actual)),
                None => false,
            },
            Self::Host(patterns) => request
                .host()
                .map_or(false, |host| patterns.iter().any(|re| re.is_match(host))),
            Self::Query { param, value } => {
                let query = match &request.query {
                    Some(query) => query,
                    None => return false,
                };
                url::form_urlencoded::parse(query.as_bytes())
                    .filter(|(key, _)| key == param)
                    .any(|(_, actual)| value.as_ref().map_or(true, |re| re.is_match(&actual)))
            }
        }
    }
}
