use std::time::Duration;

use advanced_cache_api_types::{
    BodyEncoding, DeleteResponse, EntryInfo, EntryQuery, EntryView, FlushRequest, FlushResponse,
    StoreEntryRequest,
};
use axum::{
    Json,
    http::StatusCode,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;

use crate::cache::{self, Headers, RenderedResponse, ResponseEntry};
use crate::util::bytes::ByteSize;

use super::error::{ApiError, codes};
use super::state::ApiState;

type ApiResult<T> = Result<Json<T>, ApiError>;

fn query<T>(extracted: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    extracted
        .map(|Query(value)| value)
        .map_err(|err| ApiError::bad_request("Invalid query string", Some(err.body_text())))
}

fn json<T>(extracted: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    extracted
        .map(|Json(value)| value)
        .map_err(|err| ApiError::bad_request("Invalid request body", Some(err.body_text())))
}

fn ttl_secs(ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|ttl| ttl.as_secs())
}

fn entry_view(entry: &ResponseEntry) -> EntryView {
    let (body, body_encoding) = match std::str::from_utf8(entry.body()) {
        Ok(text) => (text.to_string(), BodyEncoding::Utf8),
        Err(_) => (STANDARD.encode(entry.body()), BodyEncoding::Base64),
    };
    EntryView {
        url: entry.url().to_string(),
        variant_key: entry.variant_key().to_string(),
        status: entry.status(),
        headers: entry
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        body,
        body_encoding,
        stored_at: entry.stored_at(),
        ttl_secs: ttl_secs(entry.ttl()),
    }
}

pub async fn get_entry(
    State(state): State<ApiState>,
    params: Result<Query<EntryQuery>, QueryRejection>,
) -> ApiResult<EntryView> {
    let params = query(params)?;
    let entry = state.admin.get(&params.url, &params.variant).await?;
    Ok(Json(entry_view(&entry)))
}

pub async fn put_entry(
    State(state): State<ApiState>,
    payload: Result<Json<StoreEntryRequest>, JsonRejection>,
) -> ApiResult<EntryView> {
    let request = json(payload)?;
    let body = match request.body_encoding {
        BodyEncoding::Utf8 => Bytes::from(request.body),
        BodyEncoding::Base64 => STANDARD
            .decode(request.body.as_bytes())
            .map(Bytes::from)
            .map_err(|err| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    codes::INVALID_INPUT,
                    "Body is not valid base64",
                    Some(err.to_string()),
                )
            })?,
    };
    let response = RenderedResponse::new(request.status, Headers::from(request.headers), body);
    let ttl = request
        .ttl_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let entry = state
        .admin
        .set(&request.url, &request.variant_key, response, ttl)
        .await?;
    Ok(Json(entry_view(&entry)))
}

pub async fn delete_entry(
    State(state): State<ApiState>,
    params: Result<Query<EntryQuery>, QueryRejection>,
) -> ApiResult<DeleteResponse> {
    let params = query(params)?;
    state.admin.delete(&params.url, &params.variant).await?;
    let url = cache::normalize_url(&params.url).map_err(cache::AdminError::from)?;
    Ok(Json(DeleteResponse {
        url,
        variant_key: params.variant,
        deleted: true,
    }))
}

pub async fn entry_info(
    State(state): State<ApiState>,
    params: Result<Query<EntryQuery>, QueryRejection>,
) -> ApiResult<EntryInfo> {
    let params = query(params)?;
    let info = state.admin.info(&params.url, &params.variant).await?;
    Ok(Json(EntryInfo {
        body_size: ByteSize::from(info.body_bytes).to_string(),
        url: info.url,
        variant_key: info.variant_key,
        status: info.status,
        header_count: info.header_count,
        body_bytes: info.body_bytes,
        stored_at: info.stored_at,
        ttl_secs: ttl_secs(info.ttl),
        variants: info.variants,
    }))
}

pub async fn flush(
    State(state): State<ApiState>,
    payload: Result<Json<FlushRequest>, JsonRejection>,
) -> ApiResult<FlushResponse> {
    let request = json(payload)?;
    let removed = state.admin.flush(&request.url).await?;
    let url = cache::normalize_url(&request.url).map_err(cache::AdminError::from)?;
    Ok(Json(FlushResponse { url, removed }))
}
