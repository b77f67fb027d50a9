//! Per-session memory cache.
//!
//! Maps encoded keys to live entity values of any type. A lookup with a type
//! other than the one stored is a miss. The cache is owned by exactly one
//! session and is never shared, so it needs no synchronization.

use std::any::Any;
use std::collections::HashMap;

use triad_core::Entity;

/// Encoded key to entity map, scoped to one session.
#[derive(Default)]
pub struct MemoryCache {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached entity for `key`, if one of type `E` is present.
    pub fn get<E: Entity>(&self, key: &str) -> Option<&E> {
        self.entries.get(key).and_then(|value| value.downcast_ref::<E>())
    }

    /// Store `entity` under `key`, replacing any previous value.
    pub fn put<E: Entity>(&mut self, key: String, entity: E) {
        self.entries.insert(key, Box::new(entity));
    }

    /// Remove `key`. Returns true if an entry was removed.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Move every entry of `other` into this cache, overwriting on conflict.
    pub fn absorb(&mut self, other: MemoryCache) {
        self.entries.extend(other.entries);
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("MemoryCache").field("keys", &keys).finish()
    }
}
