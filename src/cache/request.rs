//! Inbound request description and cache-key normalisation.

use axum::http::Method;
use thiserror::Error;
use url::Url;

use super::response::Headers;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("url is empty")]
    Empty,
    #[error("`{0}` is not a valid absolute url")]
    Invalid(String),
    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("url `{0}` has no host")]
    MissingHost(String),
}

/// Strip the scheme from `raw`, producing the primary cache key.
///
/// The result is `host[:port]/path[?query]`: host lowercased, default port
/// and fragment dropped, path and query kept verbatim. Only absolute
/// `http`/`https` urls are accepted.
pub fn normalize_url(raw: &str) -> Result<String, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = Url::parse(trimmed).map_err(|_| UrlError::Invalid(trimmed.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| UrlError::MissingHost(trimmed.to_string()))?;

    let mut key = String::with_capacity(trimmed.len());
    key.push_str(host);
    if let Some(port) = parsed.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(parsed.path());
    if let Some(query) = parsed.query() {
        key.push('?');
        key.push_str(query);
    }
    Ok(key)
}

/// Transport-neutral view of an incoming request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Absolute url including scheme.
    pub url: String,
    pub headers: Headers,
}

impl InboundRequest {
    pub fn new(method: Method, url: impl Into<String>, headers: Headers) -> Self {
        Self {
            method,
            url: url.into(),
            headers,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url, Headers::new())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Immutable cache identity of a request: normalised url plus variant key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    path_start: usize,
    variant_key: String,
}

impl RequestDescriptor {
    pub fn from_inbound(inbound: &InboundRequest) -> Result<Self, UrlError> {
        Self::new(inbound.method.clone(), &inbound.url)
    }

    pub fn new(method: Method, raw_url: &str) -> Result<Self, UrlError> {
        let url = normalize_url(raw_url)?;
        let path_start = url.find('/').unwrap_or(url.len());
        Ok(Self {
            method,
            url,
            path_start,
            variant_key: String::new(),
        })
    }

    /// Same request, addressed to a cache variant.
    pub fn with_variant(self, variant_key: impl Into<String>) -> Self {
        Self {
            variant_key: variant_key.into(),
            ..self
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Scheme-less url used as the primary cache key.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn variant_key(&self) -> &str {
        &self.variant_key
    }

    pub fn host(&self) -> &str {
        &self.url[..self.path_start]
    }

    /// Path component (always starts with `/`).
    pub fn path(&self) -> &str {
        let rest = &self.url[self.path_start..];
        match rest.find('?') {
            Some(index) => &rest[..index],
            None => rest,
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.url[self.path_start..]
            .split_once('?')
            .map(|(_, query)| query)
    }

    /// Names of the query parameters, in order of appearance.
    pub fn query_params(&self) -> impl Iterator<Item = String> + '_ {
        self.query()
            .into_iter()
            .flat_map(|query| url::form_urlencoded::parse(query.as_bytes()))
            .map(|(name, _)| name.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_from_cache_key() {
        assert_eq!(
            normalize_url("https://example.com/page").as_deref(),
            Ok("example.com/page")
        );
        assert_eq!(
            normalize_url("http://example.com/page").as_deref(),
            Ok("example.com/page")
        );
    }

    #[test]
    fn lowercases_host_and_drops_default_port_and_fragment() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM:443/Path?b=2&a=1#frag").as_deref(),
            Ok("example.com/Path?b=2&a=1")
        );
        assert_eq!(
            normalize_url("http://example.com:8080/").as_deref(),
            Ok("example.com:8080/")
        );
    }

    #[test]
    fn bare_host_gets_root_path() {
        assert_eq!(
            normalize_url("https://example.com").as_deref(),
            Ok("example.com/")
        );
    }

    #[test]
    fn rejects_invalid_input() {
        assert_eq!(normalize_url("   "), Err(UrlError::Empty));
        assert!(matches!(normalize_url("badurl"), Err(UrlError::Invalid(_))));
        assert!(matches!(
            normalize_url("ftp://example.com/file"),
            Err(UrlError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn descriptor_exposes_components() {
        let descriptor =
            RequestDescriptor::new(Method::GET, "https://example.com/blog/post?s=term&page=2")
                .expect("valid url");
        assert_eq!(descriptor.host(), "example.com");
        assert_eq!(descriptor.path(), "/blog/post");
        assert_eq!(descriptor.query(), Some("s=term&page=2"));
        assert_eq!(
            descriptor.query_params().collect::<Vec<_>>(),
            vec!["s".to_string(), "page".to_string()]
        );
        assert_eq!(descriptor.variant_key(), "");

        let variant = descriptor.with_variant("device=mobile");
        assert_eq!(variant.variant_key(), "device=mobile");
        assert_eq!(variant.url(), "example.com/blog/post?s=term&page=2");
    }
}
