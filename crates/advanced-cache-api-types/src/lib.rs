//! Wire models for the advanced-cache admin API (`/api/v1/cache/*`).
//!
//! Shared by the server handlers and `advanced-cache-cli` so both ends agree
//! on field names and defaults.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How a body string is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Utf8,
    Base64,
}

/// Query string addressing one stored variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryQuery {
    pub url: String,
    #[serde(default)]
    pub variant: String,
}

/// Full stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    pub url: String,
    pub variant_key: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    #[serde(default)]
    pub body_encoding: BodyEncoding,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    pub ttl_secs: Option<u64>,
}

/// Body of `PUT /api/v1/cache/entry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntryRequest {
    pub url: String,
    #[serde(default)]
    pub variant_key: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub body_encoding: BodyEncoding,
    /// Omitted or zero keeps the entry until invalidated.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

fn default_status() -> u16 {
    200
}

/// Metadata of one stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub url: String,
    pub variant_key: String,
    pub status: u16,
    pub header_count: usize,
    pub body_bytes: usize,
    /// Human readable size, e.g. `1.5 KiB`.
    pub body_size: String,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    pub ttl_secs: Option<u64>,
    /// Every variant key known for the url.
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub url: String,
    pub variant_key: String,
    pub deleted: bool,
}

/// Body of `POST /api/v1/cache/flush`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushResponse {
    pub url: String,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
