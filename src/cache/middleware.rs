//! Page cache middleware.
//!
//! Bridges axum requests into the [`Processor`]: the inner service becomes
//! the upstream renderer and only runs when the cache cannot answer. Bodies
//! larger than the buffer limit are streamed through untouched.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tracing::{debug, warn};

use super::processor::{
    CacheOutcome, OUTCOME_HEADER, Processor, RenderError, Reply, Served, Upstream,
};
use super::request::InboundRequest;
use super::response::{Headers, RenderedResponse};

const SOURCE: &str = "advanced_cache::middleware";
const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub processor: Processor,
    /// Largest upstream body the cache buffers; larger bodies pass through.
    pub body_limit: usize,
}

/// Middleware serving pages through the cache.
pub async fn page_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let inbound = describe(&request);
    let body_limit = cache.body_limit;
    let reply = cache
        .processor
        .handle_upstream(inbound, move || async move {
            let response = next.run(request).await;
            buffer(response, body_limit).await
        })
        .await;
    match reply {
        Reply::Served(served) => build_response(served),
        Reply::Passthrough { upstream, outcome } => tag_passthrough(upstream, outcome),
    }
}

/// Absolute url and headers of `request`.
fn describe(request: &Request<Body>) -> InboundRequest {
    let headers = request.headers();
    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| matches!(*value, "http" | "https"))
        .or_else(|| request.uri().scheme_str())
        .unwrap_or("http");
    let host = request
        .uri()
        .authority()
        .map(|authority| authority.as_str())
        .or_else(|| headers.get(header::HOST).and_then(|value| value.to_str().ok()))
        .unwrap_or_default();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");

    InboundRequest::new(
        request.method().clone(),
        format!("{scheme}://{host}{path_and_query}"),
        to_headers(headers),
    )
}

fn to_headers(map: &HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Collect the inner service's response into a [`RenderedResponse`].
///
/// Bodies that declare or turn out to exceed `limit` come back as
/// [`Upstream::Passthrough`] with every byte already read replayed ahead of
/// the rest of the stream.
async fn buffer(response: Response, limit: usize) -> Result<Upstream<Response>, RenderError> {
    let ceiling = u64::try_from(limit).unwrap_or(u64::MAX);
    let declared = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    if declared.is_some_and(|length| length > ceiling)
        || response.body().size_hint().lower() > ceiling
    {
        debug!(target = SOURCE, limit, "Upstream body exceeds buffer limit");
        return Ok(Upstream::Passthrough(response));
    }

    let (parts, body) = response.into_parts();
    let mut stream = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| {
            warn!(target = SOURCE, error = %err, "Failed to read upstream body");
            RenderError::Upstream(err.to_string())
        })?;
        size += chunk.len();
        chunks.push(chunk);
        if size > limit {
            debug!(target = SOURCE, limit, "Upstream body exceeds buffer limit");
            let read = futures::stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            let body = Body::from_stream(read.chain(stream));
            return Ok(Upstream::Passthrough(Response::from_parts(parts, body)));
        }
    }

    Ok(Upstream::Page(RenderedResponse::new(
        parts.status.as_u16(),
        to_headers(&parts.headers),
        chunks.concat(),
    )))
}

/// Forward an unbuffered upstream response, tagged with the cache outcome.
fn tag_passthrough(mut response: Response, outcome: CacheOutcome) -> Response {
    response
        .headers_mut()
        .insert(OUTCOME_HEADER, HeaderValue::from_static(outcome.as_str()));
    response
}

/// Build an axum response from a served page.
fn build_response(served: Served) -> Response {
    let RenderedResponse {
        status,
        headers,
        body,
    } = served.response;

    let Ok(status) = StatusCode::from_u16(status) else {
        return StatusCode::BAD_GATEWAY.into_response();
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let map = response.headers_mut();
    for (name, value) in headers.iter() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => warn!(target = SOURCE, header = name, "Dropping invalid header"),
        }
    }
    response
}
