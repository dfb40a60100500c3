//! Latency-bounded facade over a [`StorageBackend`].
//!
//! The request path uses the lenient methods, which turn every backend
//! failure into a miss or a dropped write. Administrative callers use the
//! `try_` variants to surface failures to an operator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tracing::warn;

use super::backend::{BackendError, StorageBackend, StorageKey};

const SOURCE: &str = "cache::store";
const METRIC_BACKEND_ERROR: &str = "advanced_cache_backend_error_total";

#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn bounded<T, F>(&self, future: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    pub async fn try_get(&self, key: &StorageKey) -> Result<Option<Bytes>, BackendError> {
        self.bounded(self.backend.get(key)).await
    }

    pub async fn try_set(
        &self,
        key: &StorageKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        self.bounded(self.backend.set(key, value, ttl)).await
    }

    pub async fn try_delete(&self, key: &StorageKey) -> Result<bool, BackendError> {
        self.bounded(self.backend.delete(key)).await
    }

    pub async fn try_set_add(
        &self,
        key: &StorageKey,
        member: &str,
    ) -> Result<(bool, usize), BackendError> {
        self.bounded(self.backend.set_add(key, member)).await
    }

    pub async fn try_set_members(&self, key: &StorageKey) -> Result<Vec<String>, BackendError> {
        self.bounded(self.backend.set_members(key)).await
    }

    pub async fn try_set_remove(&self, key: &StorageKey, member: &str) -> Result<bool, BackendError> {
        self.bounded(self.backend.set_remove(key, member)).await
    }

    /// Read `key`; failures read as a miss.
    pub async fn get(&self, key: &StorageKey) -> Option<Bytes> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(error) => {
                self.report("get", key, &error);
                None
            }
        }
    }

    /// Write `key`; reports whether the backend accepted the value.
    pub async fn set(&self, key: &StorageKey, value: Bytes, ttl: Option<Duration>) -> bool {
        match self.try_set(key, value, ttl).await {
            Ok(()) => true,
            Err(error) => {
                self.report("set", key, &error);
                false
            }
        }
    }

    /// Delete `key`; reports whether a value was removed.
    pub async fn delete(&self, key: &StorageKey) -> bool {
        match self.try_delete(key).await {
            Ok(removed) => removed,
            Err(error) => {
                self.report("delete", key, &error);
                false
            }
        }
    }

    /// Add `member` to the set at `key`; `None` when the backend failed.
    pub async fn set_add(&self, key: &StorageKey, member: &str) -> Option<(bool, usize)> {
        match self.try_set_add(key, member).await {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                self.report("set_add", key, &error);
                None
            }
        }
    }

    /// Members of the set at `key`; failures read as an empty set.
    pub async fn set_members(&self, key: &StorageKey) -> Vec<String> {
        match self.try_set_members(key).await {
            Ok(members) => members,
            Err(error) => {
                self.report("set_members", key, &error);
                Vec::new()
            }
        }
    }

    /// Remove `member` from the set at `key`; reports whether it was present.
    pub async fn set_remove(&self, key: &StorageKey, member: &str) -> bool {
        match self.try_set_remove(key, member).await {
            Ok(removed) => removed,
            Err(error) => {
                self.report("set_remove", key, &error);
                false
            }
        }
    }

    fn report(&self, op: &'static str, key: &StorageKey, error: &BackendError) {
        counter!(METRIC_BACKEND_ERROR, "backend" => self.backend.name(), "op" => op)
            .increment(1);
        warn!(
            target = SOURCE,
            op,
            backend = self.backend.name(),
            key = %key,
            error = %error,
            "Storage backend call failed; degrading to uncached behaviour"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Backends with scripted failure modes for exercising degradation paths.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Backend whose every call fails or hangs, counting the attempts.
    pub(crate) struct BrokenBackend {
        pub(crate) hang: bool,
        pub(crate) calls: AtomicUsize,
    }

    impl BrokenBackend {
        pub(crate) fn failing() -> Self {
            Self {
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn hanging() -> Self {
            Self {
                hang: true,
                calls: AtomicUsize::new(0),
            }
        }

        async fn fail<T>(&self) -> Result<T, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures::future::pending::<()>().await;
            }
            Err(BackendError::Unavailable("connection refused".to_string()))
        }
    }

    #[async_trait]
    impl StorageBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &StorageKey) -> Result<Option<Bytes>, BackendError> {
            self.fail().await
        }

        async fn set(
            &self,
            _key: &StorageKey,
            _value: Bytes,
            _ttl: Option<Duration>,
        ) -> Result<(), BackendError> {
            self.fail().await
        }

        async fn delete(&self, _key: &StorageKey) -> Result<bool, BackendError> {
            self.fail().await
        }

        async fn set_add(
            &self,
            _key: &StorageKey,
            _member: &str,
        ) -> Result<(bool, usize), BackendError> {
            self.fail().await
        }

        async fn set_members(&self, _key: &StorageKey) -> Result<Vec<String>, BackendError> {
            self.fail().await
        }

        async fn set_remove(&self, _key: &StorageKey, _member: &str) -> Result<bool, BackendError> {
            self.fail().await
        }
    }
}
