//! Requester attributes consulted by policies and instructions.
//!
//! A visitor is derived from the inbound request on every call and never
//! persisted.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::Method;

use super::request::InboundRequest;
use super::response::Headers;

/// Cookie that pins a device class regardless of the user agent.
pub const DEVICE_COOKIE: &str = "advanced_cache_device";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mobile" => Some(Self::Mobile),
            "tablet" => Some(Self::Tablet),
            "desktop" => Some(Self::Desktop),
            _ => None,
        }
    }

    fn from_user_agent(agent: &str) -> Self {
        let agent = agent.to_ascii_lowercase();
        if agent.contains("ipad")
            || agent.contains("tablet")
            || (agent.contains("android") && !agent.contains("mobile"))
        {
            Self::Tablet
        } else if agent.contains("mobi")
            || agent.contains("iphone")
            || agent.contains("ipod")
            || agent.contains("android")
        {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Visitor {
    method: Method,
    headers: Headers,
    cookies: BTreeMap<String, String>,
}

impl Visitor {
    pub fn from_inbound(inbound: &InboundRequest) -> Self {
        Self::new(inbound.method.clone(), inbound.headers.clone())
    }

    pub fn new(method: Method, headers: Headers) -> Self {
        let cookies = parse_cookies(headers.get_all("cookie"));
        Self {
            method,
            headers,
            cookies,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn has_cookie_prefix(&self, prefix: &str) -> bool {
        self.cookies.keys().any(|name| name.starts_with(prefix))
    }

    /// True when any cookie name starts with one of `prefixes`.
    pub fn is_logged_in<S: AsRef<str>>(&self, prefixes: &[S]) -> bool {
        prefixes
            .iter()
            .any(|prefix| self.has_cookie_prefix(prefix.as_ref()))
    }

    /// Device class from [`DEVICE_COOKIE`], falling back to the user agent.
    pub fn device_class(&self) -> DeviceClass {
        self.cookie(DEVICE_COOKIE)
            .and_then(DeviceClass::parse)
            .unwrap_or_else(|| {
                self.header("user-agent")
                    .map(DeviceClass::from_user_agent)
                    .unwrap_or(DeviceClass::Desktop)
            })
    }
}

fn parse_cookies<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for pair in values.flat_map(|value| value.split(';')) {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        cookies
            .entry(name.to_string())
            .or_insert_with(|| value.trim().trim_matches('"').to_string());
    }
    cookies
}
