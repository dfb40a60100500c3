pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use state::{AdminToken, ApiState};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::middleware::log_responses;

pub fn build_api_router(state: ApiState) -> Router {
    let auth_state = state.clone();

    Router::new()
        .route(
            "/api/v1/cache/entry",
            get(handlers::get_entry)
                .put(handlers::put_entry)
                .delete(handlers::delete_entry),
        )
        .route("/api/v1/cache/info", get(handlers::entry_info))
        .route("/api/v1/cache/flush", post(handlers::flush))
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            middleware::api_auth,
        ))
        .layer(axum_middleware::from_fn(log_responses))
}
