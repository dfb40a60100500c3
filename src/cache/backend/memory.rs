use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;

use super::{BackendError, StorageBackend, StorageKey};
use crate::cache::lock::mutex_lock;

const NAME: &str = "memory";
const METRIC_EVICT: &str = "advanced_cache_evict_total";

enum Value {
    Bytes(Bytes),
    Members(BTreeSet<String>),
}

struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

type Entries = LruCache<StorageKey, Slot>;

fn wrong_type(key: &StorageKey) -> BackendError {
    BackendError::Backend(format!("`{key}` holds a different kind of value"))
}

/// Drop `key` when it has expired; true when a live value remains.
fn live(entries: &mut Entries, key: &StorageKey) -> bool {
    let expired = match entries.peek(key) {
        None => return false,
        Some(slot) => slot.is_expired(Instant::now()),
    };
    if expired {
        entries.pop(key);
    }
    !expired
}

fn insert(entries: &mut Entries, key: &StorageKey, slot: Slot) {
    if let Some((evicted_key, _)) = entries.push(key.clone(), slot)
        && &evicted_key != key
    {
        counter!(METRIC_EVICT, "backend" => NAME).increment(1);
    }
}

/// Process-local LRU backend.
///
/// Expired values are dropped lazily when they are read. Variant sets share
/// the LRU with page bodies and are evicted the same way.
pub struct MemoryBackend {
    entries: Mutex<Entries>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, NAME, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<Bytes>, BackendError> {
        let mut entries = mutex_lock(&self.entries, NAME, "get");
        if !live(&mut entries, key) {
            return Ok(None);
        }
        match entries.get(key).map(|slot| &slot.value) {
            Some(Value::Bytes(value)) => Ok(Some(value.clone())),
            Some(Value::Members(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &StorageKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        let slot = Slot {
            value: Value::Bytes(value),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        insert(&mut mutex_lock(&self.entries, NAME, "set"), key, slot);
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool, BackendError> {
        Ok(mutex_lock(&self.entries, NAME, "delete")
            .pop(key)
            .is_some())
    }

    async fn set_add(&self, key: &StorageKey, member: &str) -> Result<(bool, usize), BackendError> {
        let mut entries = mutex_lock(&self.entries, NAME, "set_add");
        if live(&mut entries, key) {
            match entries.get_mut(key).map(|slot| &mut slot.value) {
                Some(Value::Members(members)) => {
                    let added = members.insert(member.to_string());
                    return Ok((added, members.len()));
                }
                Some(Value::Bytes(_)) => return Err(wrong_type(key)),
                None => {}
            }
        }
        let slot = Slot {
            value: Value::Members(BTreeSet::from([member.to_string()])),
            expires_at: None,
        };
        insert(&mut entries, key, slot);
        Ok((true, 1))
    }

    async fn set_members(&self, key: &StorageKey) -> Result<Vec<String>, BackendError> {
        let mut entries = mutex_lock(&self.entries, NAME, "set_members");
        if !live(&mut entries, key) {
            return Ok(Vec::new());
        }
        match entries.get(key).map(|slot| &slot.value) {
            Some(Value::Members(members)) => Ok(members.iter().cloned().collect()),
            Some(Value::Bytes(_)) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_remove(&self, key: &StorageKey, member: &str) -> Result<bool, BackendError> {
        let mut entries = mutex_lock(&self.entries, NAME, "set_remove");
        if !live(&mut entries, key) {
            return Ok(false);
        }
        let (removed, now_empty) = match entries.peek_mut(key).map(|slot| &mut slot.value) {
            Some(Value::Members(members)) => (members.remove(member), members.is_empty()),
            Some(Value::Bytes(_)) => return Err(wrong_type(key)),
            None => (false, false),
        };
        if now_empty {
            entries.pop(key);
        }
        Ok(removed)
    }
}
