mod health;

use axum::{Router, extract::DefaultBodyLimit, middleware, routing::get};

use super::api::{ApiState, build_api_router};
use super::middleware::{log_responses, set_request_context};

/// Router for the admin listener: the cache API plus a liveness probe.
pub fn build_admin_router(state: ApiState, body_limit: usize) -> Router {
    Router::new()
        .route("/_health", get(health::admin_health))
        .layer(middleware::from_fn(log_responses))
        .merge(build_api_router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(set_request_context))
}
