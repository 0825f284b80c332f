//! CORS policy evaluation
//!
//! Full evaluation of a preflight against the configured allow-lists. The result is a
//! [`PreflightDecision`]; only `Allowed` decisions are ever cached.

use axum::http::{header, HeaderMap, HeaderValue};
use std::collections::HashSet;

use crate::core::config::CorsConfig;
use crate::core::types::insert_header;

/// One entry of the origin allow-list
#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginRule {
    Any,
    Exact(String),

    /// `https://*.example.com`: any subdomain, same scheme
    Subdomain { scheme: String, suffix: String },
}

/// Trimmed, lower-cased origin without a trailing slash
pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

impl OriginRule {
    fn parse(raw: &str) -> Self {
        let raw = normalize_origin(raw);
        if raw == "*" {
            return Self::Any;
        }
        if let Some((scheme, host)) = raw.split_once("://*.") {
            return Self::Subdomain {
                scheme: scheme.to_string(),
                suffix: format!(".{}", host),
            };
        }
        Self::Exact(raw)
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(allowed) => allowed == origin,
            Self::Subdomain { scheme, suffix } => origin
                .strip_prefix(scheme.as_str())
                .and_then(|rest| rest.strip_prefix("://"))
                .map_or(false, |host| host.len() > suffix.len() && host.ends_with(suffix.as_str())),
        }
    }
}

/// Response headers of an allowed preflight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsHeaders {
    pub allow_origin: String,

    /// Set whenever the allowed origin depends on the request
    pub vary_origin: bool,

    pub allow_methods: String,
    pub allow_headers: Option<String>,
    pub allow_credentials: bool,
    pub expose_headers: Option<String>,
    pub max_age: u32,
}

impl CorsHeaders {
    pub fn apply(&self, headers: &mut HeaderMap) {
        insert_header(headers, "access-control-allow-origin", &self.allow_origin);
        insert_header(headers, "access-control-allow-methods", &self.allow_methods);
        if let Some(allow_headers) = &self.allow_headers {
            insert_header(headers, "access-control-allow-headers", allow_headers);
        }
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if let Some(expose) = &self.expose_headers {
            insert_header(headers, "access-control-expose-headers", expose);
        }
        insert_header(headers, "access-control-max-age", &self.max_age.to_string());
        if self.vary_origin {
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.apply(&mut headers);
        headers
    }
}

/// Outcome of a full policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightDecision {
    Allowed(CorsHeaders),
    Rejected(String),
}

/// Compiled CORS policy
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Vec<OriginRule>,
    methods: Vec<String>,

    /// `None` allows any header
    headers: Option<HashSet<String>>,

    /// Configured header list as sent back to the browser
    headers_value: String,

    exposed: Option<String>,
    allow_credentials: bool,
    max_age: u32,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        let headers = if config.allowed_headers.iter().any(|h| h.trim() == "*") {
            None
        } else {
            Some(
                config
                    .allowed_headers
                    .iter()
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect(),
            )
        };

        let exposed = config
            .exposed_headers
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            origins: config.allowed_origins.iter().map(|o| OriginRule::parse(o)).collect(),
            methods: config
                .allowed_methods
                .iter()
                .map(|m| m.trim().to_ascii_uppercase())
                .collect(),
            headers,
            headers_value: config
                .allowed_headers
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            exposed: (!exposed.is_empty()).then_some(exposed),
            allow_credentials: config.allow_credentials,
            max_age: config.max_age,
        }
    }

    /// Evaluate a preflight; `requested_headers` must already be normalised
    pub fn evaluate(&self, origin: &str, method: &str, requested_headers: &[String]) -> PreflightDecision {
        let normalized_origin = normalize_origin(origin);
        let rule = match self.origins.iter().find(|rule| rule.matches(&normalized_origin)) {
            Some(rule) => rule,
            None => return PreflightDecision::Rejected(format!("origin '{}' is not allowed", origin)),
        };

        let method = method.trim().to_ascii_uppercase();
        if !self.methods.iter().any(|m| *m == method) {
            return PreflightDecision::Rejected(format!("method '{}' is not allowed", method));
        }

        let allow_headers = match &self.headers {
            None => (!requested_headers.is_empty()).then(|| requested_headers.join(", ")),
            Some(allowed) => {
                if let Some(denied) = requested_headers.iter().find(|h| !allowed.contains(*h)) {
                    return PreflightDecision::Rejected(format!("header '{}' is not allowed", denied));
                }
                (!self.headers_value.is_empty()).then(|| self.headers_value.clone())
            }
        };

        let wildcard = *rule == OriginRule::Any && !self.allow_credentials;
        PreflightDecision::Allowed(CorsHeaders {
            allow_origin: if wildcard { "*".to_string() } else { normalized_origin },
            vary_origin: !wildcard,
            allow_methods: self.methods.join(", "),
            allow_headers,
            allow_credentials: self.allow_credentials,
            expose_headers: self.exposed.clone(),
            max_age: self.max_age,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(origins: &[&str], credentials: bool) -> CorsPolicy {
        CorsPolicy::from_config(&CorsConfig {
            allowed_origins: origins.iter().map(|o| o.to_string()).collect(),
            allow_credentials: credentials,
            ..CorsConfig::default()
        })
    }

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_exact_and_subdomain_origins() {
        let policy = policy(&["https://app.example.com", "https://*.tenant.io"], false);

        assert!(matches!(
            policy.evaluate("https://app.example.com", "GET", &[]),
            PreflightDecision::Allowed(_)
        ));
        assert!(matches!(
            policy.evaluate("https://acme.tenant.io", "POST", &[]),
            PreflightDecision::Allowed(_)
        ));
        assert!(matches!(
            policy.evaluate("http://acme.tenant.io", "POST", &[]),
            PreflightDecision::Rejected(_)
        ));
        assert!(matches!(
            policy.evaluate("https://tenant.io", "POST", &[]),
            PreflightDecision::Rejected(_)
        ));
        assert!(matches!(
            policy.evaluate("https://evil.com", "GET", &[]),
            PreflightDecision::Rejected(_)
        ));
    }

    #[test]
    fn test_method_and_header_checks() {
        let policy = policy(&["https://app.example.com"], false);

        assert!(matches!(
            policy.evaluate("https://app.example.com", "TRACE", &[]),
            PreflightDecision::Rejected(_)
        ));
        assert!(matches!(
            policy.evaluate("https://app.example.com", "GET", &headers(&["x-secret"])),
            PreflightDecision::Rejected(_)
        ));
        match policy.evaluate("https://app.example.com", "put", &headers(&["authorization", "content-type"])) {
            PreflightDecision::Allowed(cors) => {
                assert_eq!(cors.allow_origin, "https://app.example.com");
                assert!(cors.vary_origin);
                assert!(cors.allow_headers.unwrap().contains("authorization"));
            }
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_origin_echo_rules() {
        match policy(&["*"], false).evaluate("https://a.com", "GET", &[]) {
            PreflightDecision::Allowed(cors) => {
                assert_eq!(cors.allow_origin, "*");
                assert!(!cors.vary_origin);
            }
            other => panic!("expected allowed, got {:?}", other),
        }

        match policy(&["*"], true).evaluate("https://a.com", "GET", &[]) {
            PreflightDecision::Allowed(cors) => {
                assert_eq!(cors.allow_origin, "https://a.com");
                assert!(cors.vary_origin);
                let map = cors.to_header_map();
                assert_eq!(map.get("access-control-allow-credentials").unwrap(), "true");
                assert_eq!(map.get("vary").unwrap(), "Origin");
            }
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_any_header_echoes_request() {
        let policy = CorsPolicy::from_config(&CorsConfig {
            allowed_origins: vec!["https://a.com".to_string()],
            allowed_headers: vec!["*".to_string()],
            ..CorsConfig::default()
        });
        match policy.evaluate("https://a.com", "GET", &headers(&["x-custom", "x-other"])) {
            PreflightDecision::Allowed(cors) => {
                assert_eq!(cors.allow_headers.as_deref(), Some("x-custom, x-other"))
            }
            other => panic!("expected allowed, got {:?}", other),
        }
    }
}
