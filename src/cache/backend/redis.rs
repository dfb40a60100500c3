use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{AsyncCommands, RedisError, aio::ConnectionManager};
use tracing::info;

use super::{BackendError, StorageBackend, StorageKey};

const NAME: &str = "redis";

/// Distributed backend over a shared Redis (or Redis-compatible) server.
///
/// The connection manager reconnects on its own; latency bounds are applied by
/// [`CacheStore`](crate::cache::CacheStore), not here.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisBackend {
    /// Connect to `url` and prefix every key with `namespace`.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(BackendError::from)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(BackendError::from)?;
        let namespace = namespace.into();
        info!(
            target = "advanced_cache::backend::redis",
            namespace = %namespace,
            "Connected to redis storage backend"
        );
        Ok(Self {
            connection,
            namespace,
        })
    }

    fn redis_key(&self, key: &StorageKey) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.namespace)
        }
    }
}

impl From<RedisError> for BackendError {
    fn from(error: RedisError) -> Self {
        if error.is_timeout() {
            BackendError::Unavailable(format!("redis timeout: {error}"))
        } else if error.is_connection_dropped()
            || error.is_connection_refusal()
            || error.is_io_error()
        {
            BackendError::Unavailable(error.to_string())
        } else {
            BackendError::Backend(error.to_string())
        }
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<Bytes>, BackendError> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = connection.get(self.redis_key(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(
        &self,
        key: &StorageKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        let mut connection = self.connection.clone();
        let redis_key = self.redis_key(key);
        match ttl {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1);
                connection
                    .set_ex::<_, _, ()>(redis_key, value.as_ref(), seconds)
                    .await?;
            }
            None => {
                connection
                    .set::<_, _, ()>(redis_key, value.as_ref())
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool, BackendError> {
        let mut connection = self.connection.clone();
        let removed: usize = connection.del(self.redis_key(key)).await?;
        Ok(removed > 0)
    }

    async fn set_add(&self, key: &StorageKey, member: &str) -> Result<(bool, usize), BackendError> {
        let mut connection = self.connection.clone();
        let redis_key = self.redis_key(key);
        let (added, len): (usize, usize) = redis::pipe()
            .atomic()
            .sadd(&redis_key, member)
            .scard(&redis_key)
            .query_async(&mut connection)
            .await?;
        Ok((added > 0, len))
    }

    async fn set_members(&self, key: &StorageKey) -> Result<Vec<String>, BackendError> {
        let mut connection = self.connection.clone();
        let members: Vec<String> = connection.smembers(self.redis_key(key)).await?;
        Ok(members)
    }

    async fn set_remove(&self, key: &StorageKey, member: &str) -> Result<bool, BackendError> {
        let mut connection = self.connection.clone();
        let removed: usize = connection.srem(self.redis_key(key), member).await?;
        Ok(removed > 0)
    }
}
