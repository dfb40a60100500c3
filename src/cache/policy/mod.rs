//! Cache admission and variant selection.
//!
//! Policies are evaluated in registration order. The first policy that
//! refuses a request (or a rendered response) decides the outcome and the
//! remaining policies are not consulted. Variant fragments are joined with
//! [`VARIANT_SEPARATOR`] in the same order, so the registration order is part
//! of every cache key.

mod builtin;

use std::time::Duration;

use thiserror::Error;

pub use builtin::{
    BypassPathsPolicy, CookieVariantPolicy, DevicePolicy, LoggedInPolicy, MethodPolicy,
    QueryBypassPolicy, ResponseHeadersPolicy, ResponseStatusPolicy,
};

use super::config::CacheConfig;
use super::request::RequestDescriptor;
use super::response::RenderedResponse;
use super::visitor::Visitor;

pub const VARIANT_SEPARATOR: &str = "|";

/// A pluggable rule contributing to admission and variant decisions.
///
/// Implementations must be pure functions of their inputs and their own
/// configuration.
pub trait CachePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a request of this shape may be served from or stored in cache.
    fn do_cache(&self, _request: &RequestDescriptor, _visitor: &Visitor) -> bool {
        true
    }

    /// Variant fragment contributed by this policy; empty means no split.
    ///
    /// Visitor-controlled text must be percent-encoded. The engine escapes
    /// any `|` left in a fragment so fragments cannot run into each other.
    fn variant_key(&self, _request: &RequestDescriptor, _visitor: &Visitor) -> String {
        String::new()
    }

    /// Whether a freshly rendered response may be stored.
    fn cache_response(&self, _response: &RenderedResponse) -> bool {
        true
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown cache policy `{0}`")]
    Unknown(String),
    #[error("cache policy `{0}` is registered twice")]
    Duplicate(String),
}

/// Outcome of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Cache { variant_key: String },
    Bypass { vetoed_by: &'static str },
}

#[derive(Default)]
pub struct PolicyEngine {
    policies: Vec<Box<dyn CachePolicy>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, policy: impl CachePolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    pub fn push(&mut self, policy: Box<dyn CachePolicy>) {
        self.policies.push(policy);
    }

    /// Build the configured policy list in configuration order.
    pub fn from_config(config: &CacheConfig) -> Result<Self, PolicyError> {
        let mut engine = Self::new();
        for name in &config.policies {
            if engine.names().any(|existing| existing == name) {
                return Err(PolicyError::Duplicate(name.clone()));
            }
            let policy: Box<dyn CachePolicy> = match name.as_str() {
                "method" => Box::new(MethodPolicy),
                "logged_in" => Box::new(LoggedInPolicy::new(
                    config.logged_in_cookie_prefixes.clone(),
                )),
                "bypass_paths" => Box::new(BypassPathsPolicy::new(config.bypass_paths.clone())),
                "query_bypass" => Box::new(QueryBypassPolicy::new(
                    config.bypass_query_params.clone(),
                )),
                "device" => Box::new(DevicePolicy),
                "cookie_variant" => {
                    Box::new(CookieVariantPolicy::new(config.variant_cookies.clone()))
                }
                "response_status" => Box::new(ResponseStatusPolicy::default()),
                "response_headers" => Box::new(ResponseHeadersPolicy),
                other => return Err(PolicyError::Unknown(other.to_string())),
            };
            engine.push(policy);
        }
        Ok(engine)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.policies.iter().map(|policy| policy.name())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// First veto wins; otherwise the composite variant key.
    pub fn evaluate(&self, request: &RequestDescriptor, visitor: &Visitor) -> Admission {
        if let Some(policy) = self
            .policies
            .iter()
            .find(|policy| !policy.do_cache(request, visitor))
        {
            return Admission::Bypass {
                vetoed_by: policy.name(),
            };
        }

        let variant_key = self
            .policies
            .iter()
            .map(|policy| policy.variant_key(request, visitor))
            .filter(|fragment| !fragment.is_empty())
            .map(|fragment| fragment.replace(VARIANT_SEPARATOR, "%7C"))
            .collect::<Vec<_>>()
            .join(VARIANT_SEPARATOR);
        Admission::Cache { variant_key }
    }

    /// Name of the first policy refusing to store `response`, if any.
    pub fn refuse_response(&self, response: &RenderedResponse) -> Option<&'static str> {
        self.policies
            .iter()
            .find(|policy| !policy.cache_response(response))
            .map(|policy| policy.name())
    }

    /// Entry lifetime for `response`.
    ///
    /// `Cache-Control: s-maxage` wins over `max-age`; without either the
    /// configured default applies. `None` keeps the entry until invalidated.
    pub fn ttl_for(response: &RenderedResponse, default: Option<Duration>) -> Option<Duration> {
        let directives = cache_control(response);
        let lookup = |name: &str| {
            directives
                .iter()
                .find(|(key, _)| key == name)
                .and_then(|(_, value)| value.as_deref())
                .and_then(|value| value.trim_matches('"').parse::<u64>().ok())
        };
        // A zero lifetime is refused by `ResponseHeadersPolicy`; never store it as "forever".
        match lookup("s-maxage").or_else(|| lookup("max-age")) {
            Some(seconds) if seconds > 0 => Some(Duration::from_secs(seconds)),
            _ => default,
        }
    }
}

/// Lowercased `Cache-Control` directives across every header value.
pub(crate) fn cache_control(response: &RenderedResponse) -> Vec<(String, Option<String>)> {
    response
        .headers
        .get_all("cache-control")
        .flat_map(|value| value.split(','))
        .filter_map(|directive| {
            let directive = directive.trim();
            if directive.is_empty() {
                return None;
            }
            Some(match directive.split_once('=') {
                Some((key, value)) => (
                    key.trim().to_ascii_lowercase(),
                    Some(value.trim().to_string()),
                ),
                None => (directive.to_ascii_lowercase(), None),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;
    use crate::cache::response::Headers;

    struct Fixed {
        name: &'static str,
        cache: bool,
        variant: &'static str,
    }

    impl CachePolicy for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn do_cache(&self, _: &RequestDescriptor, _: &Visitor) -> bool {
            self.cache
        }

        fn variant_key(&self, _: &RequestDescriptor, _: &Visitor) -> String {
            self.variant.to_string()
        }
    }

    /// Panics if consulted; proves short-circuiting.
    struct Unreachable;

    impl CachePolicy for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        fn do_cache(&self, _: &RequestDescriptor, _: &Visitor) -> bool {
            panic!("policy after a veto must not run");
        }
    }

    fn inputs() -> (RequestDescriptor, Visitor) {
        (
            RequestDescriptor::new(Method::GET, "https://example.com/page").expect("url"),
            Visitor::new(Method::GET, Headers::new()),
        )
    }

    #[test]
    fn first_veto_wins_and_short_circuits() {
        let engine = PolicyEngine::new()
            .with(Fixed { name: "a", cache: true, variant: "" })
            .with(Fixed { name: "b", cache: false, variant: "" })
            .with(Unreachable);
        let (request, visitor) = inputs();
        assert_eq!(
            engine.evaluate(&request, &visitor),
            Admission::Bypass { vetoed_by: "b" }
        );
    }

    #[test]
    fn variant_fragments_join_in_registration_order() {
        let engine = PolicyEngine::new()
            .with(Fixed { name: "a", cache: true, variant: "device=mobile" })
            .with(Fixed { name: "b", cache: true, variant: "" })
            .with(Fixed { name: "c", cache: true, variant: "ab=2" });
        let (request, visitor) = inputs();
        assert_eq!(
            engine.evaluate(&request, &visitor),
            Admission::Cache { variant_key: "device=mobile|ab=2".to_string() }
        );
        // Repeated evaluation is deterministic.
        assert_eq!(engine.evaluate(&request, &visitor), engine.evaluate(&request, &visitor));
    }

    #[test]
    fn separator_inside_a_fragment_is_escaped() {
        let (request, visitor) = inputs();
        let joined = PolicyEngine::new()
            .with(Fixed { name: "a", cache: true, variant: "x" })
            .with(Fixed { name: "b", cache: true, variant: "y" })
            .evaluate(&request, &visitor);
        let single = PolicyEngine::new()
            .with(Fixed { name: "a", cache: true, variant: "x|y" })
            .evaluate(&request, &visitor);

        assert_eq!(joined, Admission::Cache { variant_key: "x|y".to_string() });
        assert_eq!(single, Admission::Cache { variant_key: "x%7Cy".to_string() });
    }

    #[test]
    fn empty_engine_caches_everything_without_variant() {
        let (request, visitor) = inputs();
        assert_eq!(
            PolicyEngine::new().evaluate(&request, &visitor),
            Admission::Cache { variant_key: String::new() }
        );
    }

    #[test]
    fn from_config_keeps_configured_order() {
        let config = CacheConfig {
            policies: vec!["device".into(), "method".into()],
            ..Default::default()
        };
        let engine = PolicyEngine::from_config(&config).expect("engine");
        assert_eq!(engine.names().collect::<Vec<_>>(), vec!["device", "method"]);
    }

    #[test]
    fn from_config_rejects_unknown_and_duplicate_names() {
        let unknown = CacheConfig {
            policies: vec!["ab_test".into()],
            ..Default::default()
        };
        assert_eq!(
            PolicyEngine::from_config(&unknown).err(),
            Some(PolicyError::Unknown("ab_test".into()))
        );

        let duplicate = CacheConfig {
            policies: vec!["method".into(), "method".into()],
            ..Default::default()
        };
        assert_eq!(
            PolicyEngine::from_config(&duplicate).err(),
            Some(PolicyError::Duplicate("method".into()))
        );
    }

    #[test]
    fn ttl_prefers_shared_max_age() {
        let default = Some(Duration::from_secs(60));
        let mut response = RenderedResponse::html(200, "x");
        assert_eq!(PolicyEngine::ttl_for(&response, default), default);

        response.headers.append("Cache-Control", "public, max-age=120");
        assert_eq!(
            PolicyEngine::ttl_for(&response, default),
            Some(Duration::from_secs(120))
        );

        response.headers.append("cache-control", "s-maxage=600");
        assert_eq!(
            PolicyEngine::ttl_for(&response, default),
            Some(Duration::from_secs(600))
        );
    }
}
