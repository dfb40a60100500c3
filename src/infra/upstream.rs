//! Origin client: forwards cache misses to the backing site.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use reqwest::{Client, redirect};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::application::error::HttpError;
use crate::config::UpstreamSettings;

use super::error::InfraError;

const SOURCE: &str = "advanced_cache::upstream";

/// Headers scoped to a single connection; never forwarded in either direction.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];
const KEEP_ALIVE: &str = "keep-alive";
const FORWARDED_HOST: &str = "x-forwarded-host";
const FORWARDED_PROTO: &str = "x-forwarded-proto";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
    #[error("origin did not answer in time")]
    Timeout(#[source] reqwest::Error),
    #[error("origin is unreachable")]
    Connect(#[source] reqwest::Error),
    #[error("origin request failed")]
    Request(#[source] reqwest::Error),
}

impl UpstreamError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error)
        } else if error.is_connect() {
            Self::Connect(error)
        } else {
            Self::Request(error)
        }
    }
}

/// HTTP client bound to one origin.
#[derive(Debug, Clone)]
pub struct Origin {
    client: Client,
    base: Url,
    max_request_bytes: usize,
}

impl Origin {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .redirect(redirect::Policy::none())
            .user_agent(concat!("advanced-cache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::upstream(err.to_string()))?;
        Ok(Self {
            client,
            base: settings.origin.clone(),
            max_request_bytes: settings.max_request_bytes.get(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Forward `request` to the origin and return its answer verbatim, minus hop-by-hop headers.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response, UpstreamError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        let target = self.base.join(path_and_query)?;

        let body = axum::body::to_bytes(body, self.max_request_bytes)
            .await
            .map_err(|_| UpstreamError::RequestTooLarge {
                limit: self.max_request_bytes,
            })?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        // Stored bodies must stay plain text for the instruction pass.
        headers.remove(header::ACCEPT_ENCODING);
        headers.remove(header::HOST);
        if let Some(host) = parts.headers.get(header::HOST) {
            if !headers.contains_key(FORWARDED_HOST) {
                headers.insert(FORWARDED_HOST, host.clone());
            }
        }
        if !headers.contains_key(FORWARDED_PROTO) {
            headers.insert(FORWARDED_PROTO, HeaderValue::from_static("http"));
        }

        debug!(target = SOURCE, method = %parts.method, url = %target, "Forwarding to origin");
        let upstream = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());
        let bytes = upstream.bytes().await.map_err(UpstreamError::from_reqwest)?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(source: &HeaderMap) -> HeaderMap {
    let mut headers = source.clone();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(KEEP_ALIVE);
    headers.remove(header::CONTENT_LENGTH);
    headers
}

/// Fallback handler proxying every public request to the origin.
pub async fn proxy(State(origin): State<Arc<Origin>>, request: Request<Body>) -> Response {
    match origin.forward(request).await {
        Ok(response) => response,
        Err(err) => {
            let (status, message) = match &err {
                UpstreamError::RequestTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
                }
                UpstreamError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Origin timed out"),
                UpstreamError::Url(_) | UpstreamError::Connect(_) | UpstreamError::Request(_) => {
                    (StatusCode::BAD_GATEWAY, "Origin unavailable")
                }
            };
            HttpError::from_error("infra::upstream::proxy", status, message, &err).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(KEEP_ALIVE, HeaderValue::from_static("timeout=5"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        let stripped = strip_hop_by_hop(&headers);
        assert_eq!(stripped.len(), 1);
        assert!(stripped.contains_key(header::CONTENT_TYPE));
    }
}
