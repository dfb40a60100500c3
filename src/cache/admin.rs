//! Operator commands over stored entries.
//!
//! Every command takes a raw url and validates it before any backend call.
//! Unlike the request path, backend failures are reported to the caller.

use std::time::Duration;

use axum::http::Method;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use super::backend::BackendError;
use super::entry::ResponseEntry;
use super::lookup::{CacheRequest, StoreError};
use super::request::{RequestDescriptor, UrlError};
use super::response::RenderedResponse;
use super::store::CacheStore;

const SOURCE: &str = "advanced_cache::admin";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] UrlError),
    #[error("no cached entry for `{url}` (variant `{variant}`)")]
    NotFound { url: String, variant: String },
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
    #[error("storage backend failed: {0}")]
    Backend(#[from] BackendError),
}

impl From<StoreError> for AdminError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Entry(err) => Self::InvalidEntry(err.to_string()),
            StoreError::Backend(err) => Self::Backend(err),
            err @ StoreError::VariantLimit { .. } => Self::InvalidEntry(err.to_string()),
        }
    }
}

/// Metadata of one stored entry plus the variants known for its url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub url: String,
    pub variant_key: String,
    pub status: u16,
    pub header_count: usize,
    pub body_bytes: usize,
    pub stored_at: OffsetDateTime,
    pub ttl: Option<Duration>,
    pub variants: Vec<String>,
}

#[derive(Clone)]
pub struct CacheAdmin {
    store: CacheStore,
}

impl CacheAdmin {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    fn locate(&self, raw_url: &str, variant_key: &str) -> Result<RequestDescriptor, AdminError> {
        Ok(RequestDescriptor::new(Method::GET, raw_url)?.with_variant(variant_key))
    }

    fn request(&self, descriptor: &RequestDescriptor) -> CacheRequest {
        CacheRequest::new(self.store.clone(), descriptor.url())
    }

    /// Full stored entry.
    pub async fn get(&self, raw_url: &str, variant_key: &str) -> Result<ResponseEntry, AdminError> {
        let descriptor = self.locate(raw_url, variant_key)?;
        self.request(&descriptor)
            .try_get_variant(descriptor.variant_key())
            .await?
            .ok_or_else(|| not_found(&descriptor))
    }

    /// Store `response` verbatim under `(url, variant_key)`; no instructions run.
    pub async fn set(
        &self,
        raw_url: &str,
        variant_key: &str,
        mut response: RenderedResponse,
        ttl: Option<Duration>,
    ) -> Result<ResponseEntry, AdminError> {
        let descriptor = self.locate(raw_url, variant_key)?;
        if !(100..=999).contains(&response.status) {
            return Err(AdminError::InvalidEntry(format!(
                "status {} out of range",
                response.status
            )));
        }
        response.headers.strip_framing();

        let entry = ResponseEntry::new(
            descriptor.url(),
            descriptor.variant_key(),
            response,
            ttl,
        );
        self.request(&descriptor).try_store(&entry).await?;
        info!(
            target = SOURCE,
            url = entry.url(),
            variant = entry.variant_key(),
            "Stored cache entry"
        );
        Ok(entry)
    }

    /// Remove one variant; fails with `NotFound` when nothing is stored.
    pub async fn delete(&self, raw_url: &str, variant_key: &str) -> Result<(), AdminError> {
        let descriptor = self.locate(raw_url, variant_key)?;
        let request = self.request(&descriptor);
        let entry = request
            .try_get_variant(descriptor.variant_key())
            .await?
            .ok_or_else(|| not_found(&descriptor))?;
        request.delete_variant(entry.variant_key()).await?;
        info!(
            target = SOURCE,
            url = descriptor.url(),
            variant = descriptor.variant_key(),
            "Deleted cache entry"
        );
        Ok(())
    }

    /// Remove every known variant of the url. Returns how many entries were removed.
    pub async fn flush(&self, raw_url: &str) -> Result<usize, AdminError> {
        let descriptor = self.locate(raw_url, "")?;
        let removed = self.request(&descriptor).flush().await?;
        info!(
            target = SOURCE,
            url = descriptor.url(),
            removed,
            "Flushed cache entries"
        );
        Ok(removed)
    }

    pub async fn info(&self, raw_url: &str, variant_key: &str) -> Result<EntryInfo, AdminError> {
        let descriptor = self.locate(raw_url, variant_key)?;
        let request = self.request(&descriptor);
        let entry = request
            .try_get_variant(descriptor.variant_key())
            .await?
            .ok_or_else(|| not_found(&descriptor))?;
        let variants = request.variants().await.into_iter().collect();

        Ok(EntryInfo {
            url: entry.url().to_string(),
            variant_key: entry.variant_key().to_string(),
            status: entry.status(),
            header_count: entry.headers().len(),
            body_bytes: entry.body().len(),
            stored_at: entry.stored_at(),
            ttl: entry.ttl(),
            variants,
        })
    }
}

fn not_found(descriptor: &RequestDescriptor) -> AdminError {
    AdminError::NotFound {
        url: descriptor.url().to_string(),
        variant: descriptor.variant_key().to_string(),
    }
}
