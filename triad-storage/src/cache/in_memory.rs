//! In-process distributed cache backed by [`DashMap`].
//!
//! Stands in for a networked cache in tests and single-process deployments.
//! Clones share the same entries, so one instance can serve several
//! coordinators the way a real shared cache would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use triad_core::CacheError;

use super::traits::{CacheItem, CacheStats, DistributedCache};

#[derive(Debug, Clone)]
struct CachedValue {
    value: Vec<u8>,
    expiration: Option<Duration>,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedValue {
    fn new(value: Vec<u8>, expiration: Option<Duration>, now: DateTime<Utc>) -> Self {
        // An expiration too large to represent never expires.
        let expires_at = expiration
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        Self {
            value,
            expiration,
            expires_at,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct Inner {
    entries: DashMap<String, CachedValue>,
    available: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    items_added: AtomicU64,
    add_collisions: AtomicU64,
}

/// [`DistributedCache`] held in process memory.
#[derive(Debug, Clone)]
pub struct InMemoryDistributedCache {
    inner: Arc<Inner>,
}

impl Default for InMemoryDistributedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDistributedCache {
    /// Create an empty, available cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                available: AtomicBool::new(true),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                items_added: AtomicU64::new(0),
                add_collisions: AtomicU64::new(0),
            }),
        }
    }

    /// Make every subsequent call fail with [`CacheError::Unavailable`]
    /// (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Returns true if a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    /// The stored bytes for `key`, if live. Does not count as a lookup.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let now = Utc::now();
        self.inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// The expiration the live entry for `key` was stored with.
    pub fn expiration_of(&self, key: &str) -> Option<Duration> {
        let now = Utc::now();
        self.inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expiration)
    }

    /// Unconditionally store `value` under `key`, bypassing add-if-absent.
    pub fn insert_raw(&self, key: impl Into<String>, value: Vec<u8>) {
        self.inner
            .entries
            .insert(key.into(), CachedValue::new(value, None, Utc::now()));
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.inner
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Returns true if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable {
                reason: "cache marked unavailable".to_string(),
            })
        }
    }
}

impl DistributedCache for InMemoryDistributedCache {
    fn add_multi(&self, items: Vec<CacheItem>) -> Result<(), CacheError> {
        self.check_available()?;

        let now = Utc::now();
        let mut lost = Vec::new();
        for item in items {
            let value = CachedValue::new(item.value, item.expiration, now);
            match self.inner.entries.entry(item.key) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().is_expired(now) {
                        occupied.insert(value);
                        self.inner.items_added.fetch_add(1, Ordering::Relaxed);
                    } else {
                        lost.push(occupied.key().clone());
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(value);
                    self.inner.items_added.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if lost.is_empty() {
            Ok(())
        } else {
            self.inner
                .add_collisions
                .fetch_add(lost.len() as u64, Ordering::Relaxed);
            Err(CacheError::NotStored { keys: lost })
        }
    }

    fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, CacheItem>, CacheError> {
        self.check_available()?;

        let now = Utc::now();
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let hit = self
                .inner
                .entries
                .get(key)
                .filter(|entry| !entry.is_expired(now))
                .map(|entry| CacheItem {
                    key: key.clone(),
                    value: entry.value.clone(),
                    expiration: entry.expiration,
                });
            match hit {
                Some(item) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(key.clone(), item);
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(found)
    }

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        self.check_available()?;

        for key in keys {
            self.inner.entries.remove(key);
        }
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Utc::now();
        let (entry_count, memory_bytes) = self
            .inner
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .fold((0u64, 0u64), |(count, bytes), entry| {
                (
                    count + 1,
                    bytes + (entry.key().len() + entry.value().value.len()) as u64,
                )
            });

        Ok(CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            items_added: self.inner.items_added.load(Ordering::Relaxed),
            add_collisions: self.inner.add_collisions.load(Ordering::Relaxed),
        })
    }
}
