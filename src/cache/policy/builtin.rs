use axum::http::Method;
use url::form_urlencoded::byte_serialize;

use super::{CachePolicy, cache_control};
use crate::cache::request::RequestDescriptor;
use crate::cache::response::RenderedResponse;
use crate::cache::visitor::Visitor;

/// Only `GET` and `HEAD` requests are cacheable.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodPolicy;

impl CachePolicy for MethodPolicy {
    fn name(&self) -> &'static str {
        "method"
    }

    fn do_cache(&self, request: &RequestDescriptor, _visitor: &Visitor) -> bool {
        matches!(*request.method(), Method::GET | Method::HEAD)
    }
}

/// Authenticated visitors, password-protected post viewers and commenters
/// get personalised pages and are never cached.
#[derive(Debug, Clone)]
pub struct LoggedInPolicy {
    cookie_prefixes: Vec<String>,
}

impl LoggedInPolicy {
    pub fn new(cookie_prefixes: Vec<String>) -> Self {
        Self { cookie_prefixes }
    }
}

impl CachePolicy for LoggedInPolicy {
    fn name(&self) -> &'static str {
        "logged_in"
    }

    fn do_cache(&self, _request: &RequestDescriptor, visitor: &Visitor) -> bool {
        !visitor.is_logged_in(&self.cookie_prefixes)
    }
}

/// Path prefixes that are always rendered fresh.
#[derive(Debug, Clone)]
pub struct BypassPathsPolicy {
    prefixes: Vec<String>,
}

impl BypassPathsPolicy {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

fn path_matches(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

impl CachePolicy for BypassPathsPolicy {
    fn name(&self) -> &'static str {
        "bypass_paths"
    }

    fn do_cache(&self, request: &RequestDescriptor, _visitor: &Visitor) -> bool {
        let path = request.path();
        !self.prefixes.iter().any(|prefix| path_matches(path, prefix))
    }
}

/// Query parameters marking previews, searches and explicit opt-outs.
#[derive(Debug, Clone)]
pub struct QueryBypassPolicy {
    params: Vec<String>,
}

impl QueryBypassPolicy {
    pub fn new(params: Vec<String>) -> Self {
        Self { params }
    }
}

impl CachePolicy for QueryBypassPolicy {
    fn name(&self) -> &'static str {
        "query_bypass"
    }

    fn do_cache(&self, request: &RequestDescriptor, _visitor: &Visitor) -> bool {
        !request
            .query_params()
            .any(|name| self.params.iter().any(|param| *param == name))
    }
}

/// Splits the cache by device class.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevicePolicy;

impl CachePolicy for DevicePolicy {
    fn name(&self) -> &'static str {
        "device"
    }

    fn variant_key(&self, _request: &RequestDescriptor, visitor: &Visitor) -> String {
        format!("device={}", visitor.device_class())
    }
}

/// Splits the cache by the values of configured cookies (A/B buckets,
/// currency or language selectors).
///
/// Names and values are form-urlencoded, so the `=` and `&` joining them
/// (and the engine's `|`) never come from visitor input.
#[derive(Debug, Clone)]
pub struct CookieVariantPolicy {
    cookies: Vec<String>,
}

impl CookieVariantPolicy {
    pub fn new(cookies: Vec<String>) -> Self {
        Self { cookies }
    }
}

impl CachePolicy for CookieVariantPolicy {
    fn name(&self) -> &'static str {
        "cookie_variant"
    }

    fn variant_key(&self, _request: &RequestDescriptor, visitor: &Visitor) -> String {
        self.cookies
            .iter()
            .filter_map(|name| {
                visitor
                    .cookie(name)
                    .map(|value| format!("{}={}", encode(name), encode(value)))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn encode(raw: &str) -> String {
    byte_serialize(raw.as_bytes()).collect()
}

/// Only stores responses with an allowed status code.
#[derive(Debug, Clone)]
pub struct ResponseStatusPolicy {
    allowed: Vec<u16>,
}

impl ResponseStatusPolicy {
    pub fn new(allowed: Vec<u16>) -> Self {
        Self { allowed }
    }
}

impl Default for ResponseStatusPolicy {
    fn default() -> Self {
        Self::new(vec![200])
    }
}

impl CachePolicy for ResponseStatusPolicy {
    fn name(&self) -> &'static str {
        "response_status"
    }

    fn cache_response(&self, response: &RenderedResponse) -> bool {
        self.allowed.contains(&response.status)
    }
}

/// Refuses responses that are personalised, streamed or marked uncacheable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseHeadersPolicy;

impl CachePolicy for ResponseHeadersPolicy {
    fn name(&self) -> &'static str {
        "response_headers"
    }

    fn cache_response(&self, response: &RenderedResponse) -> bool {
        if response.headers.contains("set-cookie") {
            return false;
        }

        if response
            .content_type()
            .is_some_and(|value| value.trim_start().starts_with("text/event-stream"))
        {
            return false;
        }

        let directives = cache_control(response);
        let zero = |name: &str| {
            directives
                .iter()
                .any(|(key, value)| key == name && value.as_deref().map(str::trim) == Some("0"))
        };
        let has_shared = directives.iter().any(|(key, _)| key == "s-maxage");
        if zero("s-maxage") || (!has_shared && zero("max-age")) {
            return false;
        }

        !directives
            .iter()
            .any(|(key, _)| matches!(key.as_str(), "no-store" | "no-cache" | "private"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::response::Headers;

    fn request(method: Method, url: &str) -> RequestDescriptor {
        RequestDescriptor::new(method, url).expect("valid url")
    }

    fn visitor(cookie: &str) -> Visitor {
        let mut headers = Headers::new();
        if !cookie.is_empty() {
            headers.append("Cookie", cookie);
        }
        Visitor::new(Method::GET, headers)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn method_policy_allows_safe_methods_only() {
        let visitor = visitor("");
        for (method, expected) in [
            (Method::GET, true),
            (Method::HEAD, true),
            (Method::POST, false),
            (Method::PUT, false),
        ] {
            assert_eq!(
                MethodPolicy.do_cache(&request(method.clone(), "https://a.test/"), &visitor),
                expected,
                "{method}"
            );
        }
    }

    #[test]
    fn logged_in_visitors_bypass() {
        let policy = LoggedInPolicy::new(strings(&["wordpress_logged_in_", "wp-postpass_"]));
        let page = request(Method::GET, "https://a.test/");
        assert!(!policy.do_cache(&page, &visitor("wordpress_logged_in_1a2b=admin")));
        assert!(!policy.do_cache(&page, &visitor("wp-postpass_abc=hash")));
        assert!(policy.do_cache(&page, &visitor("_ga=GA1.2")));
    }

    #[test]
    fn bypass_paths_match_on_segment_boundaries() {
        let policy = BypassPathsPolicy::new(strings(&["/wp-admin", "/wp-login.php"]));
        let visitor = visitor("");
        let cached = |url: &str| policy.do_cache(&request(Method::GET, url), &visitor);
        assert!(!cached("https://a.test/wp-admin"));
        assert!(!cached("https://a.test/wp-admin/edit.php"));
        assert!(!cached("https://a.test/wp-login.php?action=lostpassword"));
        assert!(cached("https://a.test/wp-administrators-guide"));
        assert!(cached("https://a.test/blog/wp-admin"));
    }

    #[test]
    fn query_bypass_checks_parameter_names() {
        let policy = QueryBypassPolicy::new(strings(&["preview", "s"]));
        let visitor = visitor("");
        assert!(!policy.do_cache(&request(Method::GET, "https://a.test/?s=term"), &visitor));
        assert!(!policy.do_cache(
            &request(Method::GET, "https://a.test/post?p=1&preview=true"),
            &visitor
        ));
        assert!(policy.do_cache(&request(Method::GET, "https://a.test/?page=2"), &visitor));
    }

    #[test]
    fn device_and_cookie_variants() {
        let page = request(Method::GET, "https://a.test/");
        let visitor = visitor("advanced_cache_device=tablet; ab_bucket=B; lang=fr");
        assert_eq!(DevicePolicy.variant_key(&page, &visitor), "device=tablet");

        let policy = CookieVariantPolicy::new(strings(&["lang", "missing", "ab_bucket"]));
        assert_eq!(policy.variant_key(&page, &visitor), "lang=fr&ab_bucket=B");
        assert_eq!(
            CookieVariantPolicy::new(Vec::new()).variant_key(&page, &visitor),
            ""
        );
    }

    #[test]
    fn cookie_variants_escape_separators() {
        let page = request(Method::GET, "https://a.test/");
        let policy = CookieVariantPolicy::new(strings(&["a", "b"]));

        let smuggled = policy.variant_key(&page, &visitor("a=x&b=y"));
        let separate = policy.variant_key(&page, &visitor("a=x; b=y"));
        assert_eq!(separate, "a=x&b=y");
        assert_eq!(smuggled, "a=x%26b%3Dy");
        assert_ne!(smuggled, separate);

        let piped = policy.variant_key(&page, &visitor("a=x|y"));
        assert!(!piped.contains('|'));
    }

    #[test]
    fn response_status_defaults_to_ok_only() {
        let policy = ResponseStatusPolicy::default();
        assert!(policy.cache_response(&RenderedResponse::html(200, "ok")));
        assert!(!policy.cache_response(&RenderedResponse::html(404, "missing")));
        assert!(!policy.cache_response(&RenderedResponse::html(500, "error")));
    }

    #[test]
    fn response_headers_refuse_personalised_responses() {
        let with = |name: &str, value: &str| {
            let mut response = RenderedResponse::html(200, "x");
            response.headers.append(name, value);
            ResponseHeadersPolicy.cache_response(&response)
        };
        assert!(ResponseHeadersPolicy.cache_response(&RenderedResponse::html(200, "x")));
        assert!(!with("Set-Cookie", "session=1"));
        assert!(!with("Cache-Control", "private, max-age=60"));
        assert!(!with("Cache-Control", "no-store"));
        assert!(!with("Cache-Control", "max-age=0"));
        assert!(with("Cache-Control", "max-age=0, s-maxage=300"));
        assert!(with("Cache-Control", "public, max-age=300"));

        let mut stream = RenderedResponse::new(200, Headers::new(), "data: x\n\n");
        stream.headers.append("Content-Type", "text/event-stream");
        assert!(!ResponseHeadersPolicy.cache_response(&stream));
    }
}
