//! Request id propagation and response logging shared by both listeners.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Method, Request, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::cache::OUTCOME_HEADER;

const SOURCE: &str = "advanced_cache::http::response";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request data stored in request and response extensions.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
}

/// Attach a request id, reusing a sane inbound `x-request-id` when present.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let ctx = RequestContext { request_id };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

struct Exchange {
    method: Method,
    uri: Uri,
    request_id: String,
    started: Instant,
}

impl Exchange {
    fn record(&self, response: &mut Response) {
        let status = response.status();
        let elapsed_ms = self.started.elapsed().as_millis();
        let cache = response
            .headers()
            .get(OUTCOME_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !(status.is_client_error() || status.is_server_error()) {
            debug!(
                target = SOURCE,
                status = status.as_u16(),
                method = %self.method,
                path = %self.uri.path(),
                elapsed_ms,
                request_id = %self.request_id,
                cache = %cache,
                "request served",
            );
            return;
        }

        let (source, chain) = match response.extensions_mut().remove::<ErrorReport>() {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = chain
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available");

        if status.is_server_error() {
            error!(
                target = SOURCE,
                status = status.as_u16(),
                method = %self.method,
                path = %self.uri.path(),
                query = self.uri.query().unwrap_or(""),
                elapsed_ms,
                source,
                detail,
                chain = ?chain,
                request_id = %self.request_id,
                cache = %cache,
                "request failed",
            );
        } else if status != StatusCode::NOT_FOUND || source != "unknown" {
            warn!(
                target = SOURCE,
                status = status.as_u16(),
                method = %self.method,
                path = %self.uri.path(),
                query = self.uri.query().unwrap_or(""),
                elapsed_ms,
                source,
                detail,
                request_id = %self.request_id,
                cache = %cache,
                "client request error",
            );
        }
    }
}

/// Log every response; 4xx at warn and 5xx at error with the attached [`ErrorReport`].
///
/// Plain origin 404s carry no report and stay at debug level.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let exchange = Exchange {
        method: request.method().clone(),
        uri: request.uri().clone(),
        request_id: request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_default(),
        started: Instant::now(),
    };

    let mut response = next.run(request).await;
    exchange.record(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(log_responses))
            .layer(middleware::from_fn(set_request_context))
    }

    #[tokio::test]
    async fn generates_request_id() {
        let response = router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .expect("request id");
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn keeps_inbound_request_id() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "edge-42")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).map(|v| v.as_bytes()),
            Some(&b"edge-42"[..])
        );
    }
}
