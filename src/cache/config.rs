//! Page cache configuration.
//!
//! Controls admission policies, the instruction pipeline and storage timing
//! via the `[cache]` section of `advanced-cache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::instruction::InstructionKind;

const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 250;
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_MEMORY_CAPACITY: usize = 1024;
const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_VARIANTS_PER_URL: usize = 64;

pub(crate) const DEFAULT_POLICIES: &[&str] = &[
    "method",
    "bypass_paths",
    "query_bypass",
    "logged_in",
    "cookie_variant",
    "response_status",
    "response_headers",
];
pub(crate) const DEFAULT_LOGGED_IN_PREFIXES: &[&str] =
    &["wordpress_logged_in_", "wp-postpass_", "comment_author_"];
pub(crate) const DEFAULT_BYPASS_PATHS: &[&str] = &[
    "/wp-admin",
    "/wp-login.php",
    "/wp-json",
    "/xmlrpc.php",
    "/wp-cron.php",
];
pub(crate) const DEFAULT_BYPASS_QUERY_PARAMS: &[&str] = &["preview", "s", "nocache"];
pub(crate) const DEFAULT_INSTRUCTIONS: &[&str] = &["generated", "servedat"];

/// Operator-defined instruction with fixed content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticInstructionConfig {
    pub tag: String,
    pub kind: InstructionKind,
    pub content: String,
}

/// Page cache configuration from `advanced-cache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every request bypasses storage.
    pub enabled: bool,
    /// Upper bound for a single storage backend call.
    pub backend_timeout_ms: u64,
    /// TTL applied when the response carries no cache lifetime; 0 keeps entries until invalidated.
    pub default_ttl_secs: u64,
    /// Maximum entries held by the in-process backend.
    pub memory_capacity: usize,
    /// Largest response body the cache buffers.
    pub body_limit_bytes: usize,
    /// Admission policies, evaluated in this order.
    pub policies: Vec<String>,
    pub logged_in_cookie_prefixes: Vec<String>,
    pub bypass_paths: Vec<String>,
    pub bypass_query_params: Vec<String>,
    /// Cookies whose values split the cache into variants.
    pub variant_cookies: Vec<String>,
    /// Variants stored per url; further variants are served uncached.
    pub max_variants_per_url: usize,
    /// Built-in instructions, applied in this order.
    pub instructions: Vec<String>,
    /// Applied after the built-ins, in declaration order.
    pub static_instructions: Vec<StaticInstructionConfig>,
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend_timeout_ms: DEFAULT_BACKEND_TIMEOUT_MS,
            default_ttl_secs: DEFAULT_TTL_SECS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            policies: owned(DEFAULT_POLICIES),
            logged_in_cookie_prefixes: owned(DEFAULT_LOGGED_IN_PREFIXES),
            bypass_paths: owned(DEFAULT_BYPASS_PATHS),
            bypass_query_params: owned(DEFAULT_BYPASS_QUERY_PARAMS),
            variant_cookies: Vec::new(),
            max_variants_per_url: DEFAULT_MAX_VARIANTS_PER_URL,
            instructions: owned(DEFAULT_INSTRUCTIONS),
            static_instructions: Vec::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend_timeout_ms: u64::try_from(settings.backend_timeout.as_millis())
                .unwrap_or(u64::MAX),
            default_ttl_secs: settings.default_ttl.map_or(0, |ttl| ttl.as_secs()),
            memory_capacity: settings.memory_capacity.get(),
            body_limit_bytes: settings.body_limit_bytes.get(),
            policies: settings.policies.clone(),
            logged_in_cookie_prefixes: settings.logged_in_cookie_prefixes.clone(),
            bypass_paths: settings.bypass_paths.clone(),
            bypass_query_params: settings.bypass_query_params.clone(),
            variant_cookies: settings.variant_cookies.clone(),
            max_variants_per_url: settings.max_variants_per_url.get(),
            instructions: settings.instructions.clone(),
            static_instructions: settings.static_instructions.clone(),
        }
    }
}

impl CacheConfig {
    /// Backend call bound, never shorter than one millisecond.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms.max(1))
    }

    /// `None` means "until invalidated".
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend_timeout(), Duration::from_millis(250));
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.memory_capacity, 1024);
        assert_eq!(config.policies.first().map(String::as_str), Some("method"));
        assert_eq!(config.instructions, vec!["generated", "servedat"]);
        assert!(config.variant_cookies.is_empty());
        assert_eq!(config.max_variants_per_url, 64);
    }

    #[test]
    fn zero_ttl_means_until_invalidated() {
        let config = CacheConfig {
            default_ttl_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.default_ttl(), None);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_capacity: 0,
            backend_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
        assert_eq!(config.backend_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn deserializes_partial_tables() {
        let config: CacheConfig = serde_json::from_value(serde_json::json!({
            "variant_cookies": ["ab_bucket"],
            "static_instructions": [
                { "tag": "banner", "kind": "perpetual", "content": "<p>hi</p>" }
            ]
        }))
        .expect("config");
        assert_eq!(config.variant_cookies, vec!["ab_bucket"]);
        assert_eq!(config.static_instructions[0].kind, InstructionKind::Perpetual);
        assert_eq!(config.memory_capacity, 1024);
    }
}
