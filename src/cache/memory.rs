//! In-process [`KeyValueCache`] backend.
//!
//! Detail blobs live in an LRU bounded by `cache.memory_detail_limit`; every
//! other string key (the reconcile lease) is held outside the bound so detail
//! churn never evicts it. String entries expire lazily on access. Hash fields
//! live under a single mutex, which makes every hash operation atomic with
//! respect to the others.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::keys::is_detail_key;
use super::kv::{CacheError, KeyValueCache};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";

struct StringEntry {
    value: String,
    expires_at: Instant,
}

impl StringEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

struct Strings {
    details: LruCache<String, StringEntry>,
    pinned: HashMap<String, StringEntry>,
}

impl Strings {
    fn peek(&self, key: &str) -> Option<&StringEntry> {
        if is_detail_key(key) {
            self.details.peek(key)
        } else {
            self.pinned.get(key)
        }
    }

    /// Looks the entry up, promoting detail blobs in the LRU.
    fn touch(&mut self, key: &str) -> Option<&mut StringEntry> {
        if is_detail_key(key) {
            self.details.get_mut(key)
        } else {
            self.pinned.get_mut(key)
        }
    }

    fn put(&mut self, key: &str, entry: StringEntry) {
        if is_detail_key(key) {
            self.details.put(key.to_string(), entry);
        } else {
            self.pinned.insert(key.to_string(), entry);
        }
    }

    fn pop(&mut self, key: &str) {
        if is_detail_key(key) {
            self.details.pop(key);
        } else {
            self.pinned.remove(key);
        }
    }
}

pub struct MemoryCache {
    strings: Mutex<Strings>,
    hashes: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            strings: Mutex::new(Strings {
                details: LruCache::new(config.memory_detail_limit_non_zero()),
                pinned: HashMap::new(),
            }),
            hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Remaining lifetime of a live string entry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let strings = mutex_lock(&self.strings, SOURCE, "ttl");
        strings
            .peek(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Number of detail entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        mutex_lock(&self.strings, SOURCE, "len").details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut strings = mutex_lock(&self.strings, SOURCE, "get");
        match strings.touch(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                strings.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = StringEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        mutex_lock(&self.strings, SOURCE, "set_ex").put(key, entry);
        Ok(())
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut strings = mutex_lock(&self.strings, SOURCE, "replace_keep_ttl");
        match strings.touch(key) {
            Some(entry) if entry.is_live(now) => {
                entry.value = value.to_string();
                Ok(true)
            }
            Some(_) => {
                strings.pop(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut strings = mutex_lock(&self.strings, SOURCE, "set_nx_ex");
        if strings.peek(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        strings.put(
            key,
            StringEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        mutex_lock(&self.strings, SOURCE, "delete").pop(key);
        mutex_lock(&self.hashes, SOURCE, "delete").remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut strings = mutex_lock(&self.strings, SOURCE, "delete_if_eq");
        let matches = strings
            .peek(key)
            .is_some_and(|entry| entry.is_live(now) && entry.value == expected);
        if matches {
            strings.pop(key);
        }
        Ok(matches)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<i64>, CacheError> {
        let hashes = mutex_lock(&self.hashes, SOURCE, "hget");
        Ok(hashes.get(key).and_then(|hash| hash.get(field)).copied())
    }

    async fn hset(&self, key: &str, field: &str, value: i64) -> Result<(), CacheError> {
        mutex_lock(&self.hashes, SOURCE, "hset")
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: i64) -> Result<bool, CacheError> {
        let mut hashes = mutex_lock(&self.hashes, SOURCE, "hset_nx");
        let hash = hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value);
        Ok(true)
    }

    async fn hincr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>, CacheError> {
        let mut hashes = mutex_lock(&self.hashes, SOURCE, "hincr_existing");
        let Some(value) = hashes.get_mut(key).and_then(|hash| hash.get_mut(field)) else {
            return Ok(None);
        };
        *value = value
            .checked_add(delta)
            .ok_or_else(|| CacheError::codec(format!("increment overflows `{key}`/{field}")))?;
        Ok(Some(*value))
    }

    async fn hset_guarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
        value: i64,
    ) -> Result<bool, CacheError> {
        let mut hashes = mutex_lock(&self.hashes, SOURCE, "hset_guarded");
        if !has_field(&hashes, guard, field) {
            return Ok(false);
        }
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(true)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut hashes = mutex_lock(&self.hashes, SOURCE, "hdel");
        remove_field(&mut hashes, key, field);
        Ok(())
    }

    async fn hdel_unguarded(
        &self,
        key: &str,
        guard: &str,
        field: &str,
    ) -> Result<bool, CacheError> {
        let mut hashes = mutex_lock(&self.hashes, SOURCE, "hdel_unguarded");
        if has_field(&hashes, guard, field) {
            return Ok(false);
        }
        Ok(remove_field(&mut hashes, key, field))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, CacheError> {
        let hashes = mutex_lock(&self.hashes, SOURCE, "hgetall");
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

fn has_field(hashes: &HashMap<String, HashMap<String, i64>>, key: &str, field: &str) -> bool {
    hashes.get(key).is_some_and(|hash| hash.contains_key(field))
}

fn remove_field(hashes: &mut HashMap<String, HashMap<String, i64>>, key: &str, field: &str) -> bool {
    let Some(hash) = hashes.get_mut(key) else {
        return false;
    };
    let removed = hash.remove(field).is_some();
    if hash.is_empty() {
        hashes.remove(key);
    }
    removed
}
