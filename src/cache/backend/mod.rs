//! Pluggable key/value storage behind the page cache.
//!
//! Every backend speaks the same operations over a [`StorageKey`], which
//! folds the group and context namespaces into the address so that a
//! response body and the sidecar variant index never share a slot even when
//! their ids coincide. Values are either opaque byte strings or string sets;
//! set members are added and removed one at a time so concurrent writers
//! never overwrite each other.

mod memory;
mod redis;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// Top-level namespace of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageGroup {
    /// Full page bodies.
    Page,
    /// Per-URL variant index.
    Sidecar,
}

impl StorageGroup {
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageGroup::Page => "advanced-cache",
            StorageGroup::Sidecar => "advanced-cache-data",
        }
    }
}

/// Logical context inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageContext {
    Response,
    Data,
}

impl StorageContext {
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageContext::Response => "response",
            StorageContext::Data => "data",
        }
    }
}

/// Fully qualified address of a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub group: StorageGroup,
    pub context: StorageContext,
    pub id: String,
}

impl StorageKey {
    pub fn new(group: StorageGroup, context: StorageContext, id: impl Into<String>) -> Self {
        Self {
            group,
            context,
            id: id.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.group.as_str(),
            self.context.as_str(),
            self.id
        )
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Contract implemented by every storage backend.
///
/// Implementations must be safe for concurrent use and must resolve each call
/// to a value, a miss or an error; they never block indefinitely.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &StorageKey) -> Result<Option<Bytes>, BackendError>;

    /// Store `value`, replacing any previous value. `ttl` of `None` keeps the
    /// value until it is deleted or evicted.
    async fn set(
        &self,
        key: &StorageKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError>;

    /// Delete `key`, reporting whether a value was present.
    async fn delete(&self, key: &StorageKey) -> Result<bool, BackendError>;

    /// Add `member` to the set at `key`. Returns whether it was new and the
    /// set size afterwards.
    async fn set_add(&self, key: &StorageKey, member: &str) -> Result<(bool, usize), BackendError>;

    /// Members of the set at `key`; a missing key is an empty set.
    async fn set_members(&self, key: &StorageKey) -> Result<Vec<String>, BackendError>;

    /// Remove `member` from the set at `key`, reporting whether it was present.
    async fn set_remove(&self, key: &StorageKey, member: &str) -> Result<bool, BackendError>;
}
