use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::{ApiError, codes};
use super::state::ApiState;

pub async fn api_auth(State(state): State<ApiState>, request: Request<Body>, next: Next) -> Response {
    let Some(expected) = state.token.as_ref() else {
        return ApiError::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Admin API disabled",
            Some("set admin.token (ADVANCED_CACHE__ADMIN__TOKEN) to enable it".to_string()),
        )
        .into_response();
    };

    let token = extract_token(request.headers().get(header::AUTHORIZATION));
    match token {
        Some(token) if expected.verify(token) => next.run(request).await,
        _ => ApiError::unauthorized().into_response(),
    }
}

fn extract_token(header: Option<&HeaderValue>) -> Option<&str> {
    let raw = header?.to_str().ok()?;
    raw.strip_prefix("Bearer ")
}
