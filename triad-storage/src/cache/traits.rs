//! Distributed cache contract.
//!
//! The distributed cache is shared between processes and holds serialized
//! entities under their encoded keys. It is never authoritative: the
//! coordinator only populates it from datastore reads and only invalidates it
//! after datastore writes.

use std::collections::HashMap;
use std::time::Duration;

use triad_core::CacheError;

/// A serialized entity stored in the distributed cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    /// Encoded entity key.
    pub key: String,
    /// Serialized entity.
    pub value: Vec<u8>,
    /// Time-to-live from the moment the item is stored. `None` never expires.
    pub expiration: Option<Duration>,
}

impl CacheItem {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            expiration: None,
        }
    }

    pub fn with_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.expiration = expiration;
        self
    }
}

/// Shared cache of serialized entities.
///
/// Implementations must be thread-safe; one instance is shared by every
/// session of a coordinator.
///
/// # Add-if-absent
///
/// [`DistributedCache::add_multi`] never overwrites a live value. Items that
/// lose to an existing value are reported together as
/// [`CacheError::NotStored`]; every other item of the call is still stored.
/// Losing an add is a race signal, not a fault.
pub trait DistributedCache: Send + Sync {
    /// Store each item unless a live value already exists under its key.
    fn add_multi(&self, items: Vec<CacheItem>) -> Result<(), CacheError>;

    /// Look up `keys`. Misses are simply absent from the returned map.
    fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, CacheItem>, CacheError>;

    /// Remove `keys`. Removing an absent key is not an error.
    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Usage statistics.
    fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of keys found by lookups.
    pub hits: u64,
    /// Number of keys missed by lookups.
    pub misses: u64,
    /// Number of live entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of items stored by adds.
    pub items_added: u64,
    /// Number of adds that lost to an existing value.
    pub add_collisions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_item_builder() {
        let item = CacheItem::new("Widget:i1", vec![1, 2])
            .with_expiration(Some(Duration::from_secs(30)));
        assert_eq!(item.key, "Widget:i1");
        assert_eq!(item.expiration, Some(Duration::from_secs(30)));
    }
}
