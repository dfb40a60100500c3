//! Per-url accessor over stored response variants.

use std::collections::BTreeSet;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::backend::BackendError;
use super::config::DEFAULT_MAX_VARIANTS_PER_URL;
use super::entry::{EntryError, ResponseEntry};
use super::keys::{response_key, sidecar_key};
use super::store::CacheStore;

const SOURCE: &str = "advanced_cache::lookup";
const METRIC_CORRUPT: &str = "advanced_cache_corrupt_total";
const METRIC_VARIANT_LIMIT: &str = "advanced_cache_variant_limit_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("url already has {limit} stored variants")]
    VariantLimit { limit: usize },
}

/// Access to the cached variants of a single normalised url.
///
/// Variants are tracked in a per-url set in the backend. A variant joins the
/// set before its body is written, so a flush always sees every stored body.
#[derive(Clone)]
pub struct CacheRequest {
    url: String,
    store: CacheStore,
    max_variants: usize,
}

impl CacheRequest {
    /// `url` must already be normalised (see [`normalize_url`](super::normalize_url)).
    pub fn new(store: CacheStore, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            store,
            max_variants: DEFAULT_MAX_VARIANTS_PER_URL,
        }
    }

    /// Cap on distinct variants stored for this url.
    pub fn with_variant_limit(mut self, max_variants: usize) -> Self {
        self.max_variants = max_variants.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the entry for `variant_key`; backend failures and corrupt data read as a miss.
    pub async fn get_variant(&self, variant_key: &str) -> Option<ResponseEntry> {
        let key = response_key(&self.url, variant_key);
        let raw = self.store.get(&key).await?;
        self.decode_or_heal(&raw, variant_key).await
    }

    /// Like [`get_variant`](Self::get_variant) but surfaces backend failures.
    pub async fn try_get_variant(
        &self,
        variant_key: &str,
    ) -> Result<Option<ResponseEntry>, BackendError> {
        let key = response_key(&self.url, variant_key);
        match self.store.try_get(&key).await? {
            Some(raw) => Ok(self.decode_or_heal(&raw, variant_key).await),
            None => Ok(None),
        }
    }

    async fn decode_or_heal(&self, raw: &Bytes, variant_key: &str) -> Option<ResponseEntry> {
        match ResponseEntry::decode(raw, &self.url, variant_key) {
            Ok(entry) => Some(entry),
            Err(error) => {
                self.heal(variant_key, &error).await;
                None
            }
        }
    }

    async fn heal(&self, variant_key: &str, error: &EntryError) {
        counter!(METRIC_CORRUPT).increment(1);
        let removed = self
            .store
            .delete(&response_key(&self.url, variant_key))
            .await;
        warn!(
            target = SOURCE,
            url = %self.url,
            variant = variant_key,
            error = %error,
            removed,
            "Discarded undecodable cache entry"
        );
    }

    /// Store `entry` under its variant.
    ///
    /// Returns false when the variant could not be indexed, the url is at its
    /// variant limit, or the body could not be written.
    pub async fn store(&self, entry: &ResponseEntry) -> bool {
        let variant_key = entry.variant_key();
        let Some(added) = self
            .store
            .set_add(&sidecar_key(&self.url), variant_key)
            .await
        else {
            return false;
        };
        if !self.within_limit(variant_key, added).await {
            return false;
        }
        entry.set(&self.store).await
    }

    /// Like [`store`](Self::store) but surfaces encoding, limit and backend failures.
    pub async fn try_store(&self, entry: &ResponseEntry) -> Result<(), StoreError> {
        let raw = entry.encode()?;
        let variant_key = entry.variant_key();
        let added = self
            .store
            .try_set_add(&sidecar_key(&self.url), variant_key)
            .await?;
        if !self.within_limit(variant_key, added).await {
            return Err(StoreError::VariantLimit {
                limit: self.max_variants,
            });
        }
        self.store
            .try_set(&entry.storage_key(), raw, entry.ttl())
            .await?;
        Ok(())
    }

    /// Undo a fresh index insertion that pushed the url past its limit.
    async fn within_limit(&self, variant_key: &str, (added, len): (bool, usize)) -> bool {
        if !added || len <= self.max_variants {
            return true;
        }
        self.store
            .set_remove(&sidecar_key(&self.url), variant_key)
            .await;
        counter!(METRIC_VARIANT_LIMIT).increment(1);
        debug!(
            target = SOURCE,
            url = %self.url,
            variant = variant_key,
            limit = self.max_variants,
            "Variant limit reached; not storing"
        );
        false
    }

    /// Remove the entry for `variant_key` and drop it from the variant index,
    /// returning whether an entry existed.
    pub async fn delete_variant(&self, variant_key: &str) -> Result<bool, BackendError> {
        let removed = self
            .store
            .try_delete(&response_key(&self.url, variant_key))
            .await?;
        self.store
            .set_remove(&sidecar_key(&self.url), variant_key)
            .await;
        Ok(removed)
    }

    /// Variant keys known for this url.
    pub async fn variants(&self) -> BTreeSet<String> {
        self.store
            .set_members(&sidecar_key(&self.url))
            .await
            .into_iter()
            .collect()
    }

    /// Delete every known variant (always including the default one) and the
    /// variant index. Returns the number of entries removed.
    pub async fn flush(&self) -> Result<usize, BackendError> {
        let index = sidecar_key(&self.url);
        let mut variants: BTreeSet<String> = self
            .store
            .try_set_members(&index)
            .await?
            .into_iter()
            .collect();
        variants.insert(String::new());

        let mut removed = 0;
        for variant in &variants {
            if self
                .store
                .try_delete(&response_key(&self.url, variant))
                .await?
            {
                removed += 1;
            }
        }
        self.store.try_delete(&index).await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::backend::{MemoryBackend, StorageBackend, StorageKey};
    use crate::cache::response::RenderedResponse;

    /// Memory backend that yields to the scheduler before every call, so
    /// concurrent requests interleave between backend round trips.
    struct Yielding(MemoryBackend);

    #[async_trait]
    impl StorageBackend for Yielding {
        fn name(&self) -> &'static str {
            "yielding"
        }

        async fn get(&self, key: &StorageKey) -> Result<Option<Bytes>, BackendError> {
            tokio::task::yield_now().await;
            self.0.get(key).await
        }

        async fn set(
            &self,
            key: &StorageKey,
            value: Bytes,
            ttl: Option<Duration>,
        ) -> Result<(), BackendError> {
            tokio::task::yield_now().await;
            self.0.set(key, value, ttl).await
        }

        async fn delete(&self, key: &StorageKey) -> Result<bool, BackendError> {
            tokio::task::yield_now().await;
            self.0.delete(key).await
        }

        async fn set_add(
            &self,
            key: &StorageKey,
            member: &str,
        ) -> Result<(bool, usize), BackendError> {
            tokio::task::yield_now().await;
            self.0.set_add(key, member).await
        }

        async fn set_members(&self, key: &StorageKey) -> Result<Vec<String>, BackendError> {
            tokio::task::yield_now().await;
            self.0.set_members(key).await
        }

        async fn set_remove(&self, key: &StorageKey, member: &str) -> Result<bool, BackendError> {
            tokio::task::yield_now().await;
            self.0.set_remove(key, member).await
        }
    }

    fn store() -> CacheStore {
        CacheStore::new(
            Arc::new(MemoryBackend::new(
                NonZeroUsize::new(16).expect("non-zero"),
            )),
            Duration::from_secs(1),
        )
    }

    fn entry(url: &str, variant: &str, body: &'static str) -> ResponseEntry {
        ResponseEntry::new(url, variant, RenderedResponse::html(200, body), None)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let request = CacheRequest::new(store(), "example.com/page");
        let stored = entry("example.com/page", "", "<p>hello</p>");
        assert!(request.store(&stored).await);

        let fetched = request.get_variant("").await.expect("hit");
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn variants_are_isolated() {
        let request = CacheRequest::new(store(), "example.com/page");
        assert!(request.store(&entry("example.com/page", "A", "bodyA")).await);
        assert!(request.store(&entry("example.com/page", "B", "bodyB")).await);

        let a = request.get_variant("A").await.expect("variant A");
        let b = request.get_variant("B").await.expect("variant B");
        assert_eq!(a.body(), &Bytes::from_static(b"bodyA"));
        assert_eq!(b.body(), &Bytes::from_static(b"bodyB"));
        assert!(request.get_variant("").await.is_none());
        assert_eq!(
            request.variants().await.into_iter().collect::<Vec<_>>(),
            vec!["A".to_string(), "B".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_then_get_is_a_miss() {
        let store = store();
        let request = CacheRequest::new(store.clone(), "example.com/page");
        let stored = entry("example.com/page", "", "x");
        assert!(request.store(&stored).await);
        assert!(stored.delete(&store).await);
        assert!(request.get_variant("").await.is_none());
        assert!(!request.delete_variant("").await.expect("delete"));
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss_and_removed() {
        let store = store();
        let key = response_key("example.com/page", "");
        assert!(store.set(&key, Bytes::from_static(b"{broken"), None).await);

        let request = CacheRequest::new(store.clone(), "example.com/page");
        assert!(request.get_variant("").await.is_none());
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn flush_removes_all_variants_and_sidecar() {
        let store = store();
        let request = CacheRequest::new(store.clone(), "example.com/page");
        for variant in ["", "device=mobile", "device=tablet"] {
            assert!(request.store(&entry("example.com/page", variant, "x")).await);
        }
        let other = CacheRequest::new(store.clone(), "example.com/other");
        assert!(other.store(&entry("example.com/other", "", "y")).await);

        assert_eq!(request.flush().await.expect("flush"), 3);
        assert!(request.get_variant("device=mobile").await.is_none());
        assert!(request.variants().await.is_empty());
        assert!(other.get_variant("").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_stores_keep_every_variant_flushable() {
        let store = CacheStore::new(
            Arc::new(Yielding(MemoryBackend::new(
                NonZeroUsize::new(16).expect("non-zero"),
            ))),
            Duration::from_secs(1),
        );
        let request = CacheRequest::new(store, "example.com/page");
        let a = entry("example.com/page", "v=a", "a");
        let b = entry("example.com/page", "v=b", "b");

        let (stored_a, stored_b) = tokio::join!(request.store(&a), request.store(&b));
        assert!(stored_a && stored_b);
        assert_eq!(request.variants().await.len(), 2);

        assert_eq!(request.flush().await.expect("flush"), 2);
        assert!(request.get_variant("v=a").await.is_none());
        assert!(request.get_variant("v=b").await.is_none());
    }

    #[tokio::test]
    async fn variant_limit_refuses_new_variants_until_one_is_deleted() {
        let request = CacheRequest::new(store(), "example.com/page").with_variant_limit(2);
        assert!(request.store(&entry("example.com/page", "A", "a")).await);
        assert!(request.store(&entry("example.com/page", "B", "b")).await);

        assert!(!request.store(&entry("example.com/page", "C", "c")).await);
        assert!(request.get_variant("C").await.is_none());
        assert!(matches!(
            request.try_store(&entry("example.com/page", "C", "c")).await,
            Err(StoreError::VariantLimit { limit: 2 })
        ));
        // Known variants can still be refreshed at the limit.
        assert!(request.store(&entry("example.com/page", "A", "a2")).await);

        assert!(request.delete_variant("B").await.expect("delete"));
        assert_eq!(
            request.variants().await,
            BTreeSet::from(["A".to_string()])
        );
        assert!(request.store(&entry("example.com/page", "C", "c")).await);
    }

    #[tokio::test]
    async fn flush_of_unknown_url_removes_nothing() {
        let request = CacheRequest::new(store(), "example.com/nothing");
        assert_eq!(request.flush().await.expect("flush"), 0);
    }
}
