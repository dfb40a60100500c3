//! Response value types shared by the processor, the policies and the codec.

use bytes::Bytes;

/// Headers that never survive caching or a rewritten body.
const FRAMING_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Ordered header list with case-insensitive lookup.
///
/// Duplicate names are preserved in insertion order, which matters for
/// `Set-Cookie`, `Link` and `Vary`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, keeping any existing values with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
    }

    /// Remove all values of `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.0
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<(String, String)> {
        self.0
    }

    /// Drop hop-by-hop and body framing headers.
    pub fn strip_framing(&mut self) {
        self.0.retain(|(key, _)| {
            !FRAMING_HEADERS
                .iter()
                .any(|framing| key.eq_ignore_ascii_case(framing))
        });
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(value: Vec<(String, String)>) -> Self {
        Self(value)
    }
}

/// A response as produced by the upstream renderer or reconstructed from cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl RenderedResponse {
    pub fn new(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Convenience constructor for an HTML document.
    pub fn html(status: u16, body: impl Into<Bytes>) -> Self {
        let mut headers = Headers::new();
        headers.append("content-type", "text/html; charset=utf-8");
        Self::new(status, headers, body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// True when the body is HTML (or untyped, which upstream renderers
    /// commonly emit for HTML pages).
    pub fn is_html(&self) -> bool {
        self.content_type().is_none_or(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("text/html")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_keeps_duplicates() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");
        headers.append("Content-Type", "text/html");

        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
        assert_eq!(
            headers.get_all("Set-Cookie").collect::<Vec<_>>(),
            vec!["a=1", "b=2"]
        );
        assert_eq!(headers.remove("set-cookie"), 2);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn first_value_outlives_the_name_buffer() {
        let mut headers = Headers::new();
        headers.append("Link", "</a.css>; rel=preload");
        let value = {
            let name = String::from("link");
            headers.get(&name)
        };
        assert_eq!(value, Some("</a.css>; rel=preload"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn insert_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("Vary", "Cookie");
        headers.append("vary", "Accept");
        headers.insert("VARY", "Accept-Encoding");
        assert_eq!(
            headers.get_all("vary").collect::<Vec<_>>(),
            vec!["Accept-Encoding"]
        );
    }

    #[test]
    fn strip_framing_keeps_entity_headers() {
        let mut headers = Headers::new();
        headers.append("Content-Length", "42");
        headers.append("Transfer-Encoding", "chunked");
        headers.append("Connection", "keep-alive");
        headers.append("Content-Type", "text/html");
        headers.strip_framing();
        assert_eq!(headers.into_vec(), vec![(
            "Content-Type".to_string(),
            "text/html".to_string()
        )]);
    }

    #[test]
    fn untyped_bodies_are_treated_as_html() {
        let response = RenderedResponse::new(200, Headers::new(), "<p>hi</p>");
        assert!(response.is_html());

        let mut headers = Headers::new();
        headers.append("Content-Type", "application/json");
        let response = RenderedResponse::new(200, headers, "{}");
        assert!(!response.is_html());
    }
}
