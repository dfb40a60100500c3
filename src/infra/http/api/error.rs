use advanced_cache_api_types::{ApiErrorBody, ApiErrorMessage};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::application::error::ErrorReport;
use crate::cache::AdminError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_URL: &str = "invalid_url";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const BACKEND: &str = "backend_error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Admin token required",
            None,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<AdminError> for ApiError {
    fn from(error: AdminError) -> Self {
        let hint = Some(error.to_string());
        match error {
            AdminError::InvalidUrl(_) => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_URL,
                "Invalid url",
                hint,
            ),
            AdminError::NotFound { .. } => Self::new(
                StatusCode::NOT_FOUND,
                codes::NOT_FOUND,
                "No cached entry",
                hint,
            ),
            AdminError::InvalidEntry(_) => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Invalid entry",
                hint,
            ),
            AdminError::Backend(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::BACKEND,
                "Storage backend unavailable",
                hint,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}
