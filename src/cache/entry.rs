//! Stored unit of the page cache and its wire format.
//!
//! An entry is serialised as a versioned JSON envelope with a base64 body.
//! Anything that fails to decode, carries an unknown version or does not
//! belong to the address it was read from is reported as an [`EntryError`]
//! and treated as a miss by callers.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::backend::StorageKey;
use super::keys::response_key;
use super::response::{Headers, RenderedResponse};
use super::store::CacheStore;

const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("failed to encode entry: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("stored entry is not valid json: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("stored entry has unsupported version {0}")]
    Version(u8),
    #[error("stored entry is malformed: {0}")]
    Malformed(String),
    #[error("stored entry belongs to `{url}` variant `{variant}`")]
    Identity { url: String, variant: String },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u8,
    url: String,
    variant: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    stored_at: i64,
    ttl: Option<u64>,
}

/// A cached response addressed by `(url, variant_key)`.
///
/// Entries are value objects: every read reconstructs one and every write
/// replaces the stored copy in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEntry {
    url: String,
    variant_key: String,
    response: RenderedResponse,
    stored_at: OffsetDateTime,
    ttl: Option<Duration>,
}

impl ResponseEntry {
    pub fn new(
        url: impl Into<String>,
        variant_key: impl Into<String>,
        response: RenderedResponse,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            url: url.into(),
            variant_key: variant_key.into(),
            response,
            stored_at: now_truncated(),
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn variant_key(&self) -> &str {
        &self.variant_key
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn headers(&self) -> &Headers {
        &self.response.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.response.body
    }

    pub fn response(&self) -> &RenderedResponse {
        &self.response
    }

    pub fn into_response(self) -> RenderedResponse {
        self.response
    }

    pub fn stored_at(&self) -> OffsetDateTime {
        self.stored_at
    }

    /// `None` means the entry lives until invalidated.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn storage_key(&self) -> StorageKey {
        response_key(&self.url, &self.variant_key)
    }

    pub fn encode(&self) -> Result<Bytes, EntryError> {
        let envelope = Envelope {
            v: ENVELOPE_VERSION,
            url: self.url.clone(),
            variant: self.variant_key.clone(),
            status: self.response.status,
            headers: self
                .response
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: STANDARD.encode(&self.response.body),
            stored_at: self.stored_at.unix_timestamp(),
            ttl: self.ttl.map(|ttl| ttl.as_secs()),
        };
        serde_json::to_vec(&envelope)
            .map(Bytes::from)
            .map_err(EntryError::Encode)
    }

    /// Decode bytes read from the slot of `(url, variant_key)`.
    pub fn decode(raw: &[u8], url: &str, variant_key: &str) -> Result<Self, EntryError> {
        let envelope: Envelope = serde_json::from_slice(raw).map_err(EntryError::Decode)?;
        if envelope.v != ENVELOPE_VERSION {
            return Err(EntryError::Version(envelope.v));
        }
        if envelope.url != url || envelope.variant != variant_key {
            return Err(EntryError::Identity {
                url: envelope.url,
                variant: envelope.variant,
            });
        }
        if !(100..=999).contains(&envelope.status) {
            return Err(EntryError::Malformed(format!(
                "status {} out of range",
                envelope.status
            )));
        }
        let body = STANDARD
            .decode(envelope.body.as_bytes())
            .map_err(|err| EntryError::Malformed(format!("body is not base64: {err}")))?;
        let stored_at = OffsetDateTime::from_unix_timestamp(envelope.stored_at)
            .map_err(|err| EntryError::Malformed(format!("stored_at: {err}")))?;

        Ok(Self {
            url: envelope.url,
            variant_key: envelope.variant,
            response: RenderedResponse::new(
                envelope.status,
                Headers::from(envelope.headers),
                body,
            ),
            stored_at,
            ttl: envelope.ttl.map(Duration::from_secs),
        })
    }

    /// Persist the entry, replacing any previous copy. Returns backend success.
    pub async fn set(&self, store: &CacheStore) -> bool {
        match self.encode() {
            Ok(raw) => store.set(&self.storage_key(), raw, self.ttl).await,
            Err(error) => {
                tracing::error!(
                    target = "advanced_cache::entry",
                    url = %self.url,
                    variant = %self.variant_key,
                    error = %error,
                    "Failed to encode response entry"
                );
                false
            }
        }
    }

    /// Remove the stored copy. Returns true when the backend removed a value.
    pub async fn delete(&self, store: &CacheStore) -> bool {
        store.delete(&self.storage_key()).await
    }
}

fn now_truncated() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}
