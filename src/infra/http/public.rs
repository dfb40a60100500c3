use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, middleware};

use crate::cache::{CacheState, page_cache_layer};
use crate::infra::upstream::{Origin, proxy};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct PublicState {
    pub origin: Arc<Origin>,
    /// `None` proxies straight to the origin.
    pub cache: Option<CacheState>,
}

/// Router for the public listener: every request falls through to the origin,
/// passing the page cache first when one is configured.
pub fn build_public_router(state: PublicState, body_limit: usize) -> Router {
    let routes = Router::new().fallback(proxy).with_state(state.origin);

    let routes = match state.cache {
        Some(cache) => routes.layer(middleware::from_fn_with_state(cache, page_cache_layer)),
        None => routes,
    };

    routes
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
