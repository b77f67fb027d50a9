//! Coordinator counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Reads answered by a session memory cache.
    pub memory_hits: u64,
    /// Keys found in the distributed cache.
    pub cache_hits: u64,
    /// Keys missed in the distributed cache, including undecodable hits.
    pub cache_misses: u64,
    /// Distributed cache calls that failed and were absorbed.
    pub cache_errors: u64,
    /// Keys requested from the datastore by reads.
    pub store_reads: u64,
    /// Populates that lost to a value cached concurrently.
    pub lost_races: u64,
    /// Invalidations that failed after a successful write or delete.
    pub failed_invalidations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    memory_hits: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    store_reads: AtomicU64,
    lost_races: AtomicU64,
    failed_invalidations: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    MemoryHits,
    CacheHits,
    CacheMisses,
    CacheErrors,
    StoreReads,
    LostRaces,
    FailedInvalidations,
}

impl Counters {
    pub(crate) fn add(&self, counter: Counter, n: usize) {
        if n == 0 {
            return;
        }
        let slot = match counter {
            Counter::MemoryHits => &self.memory_hits,
            Counter::CacheHits => &self.cache_hits,
            Counter::CacheMisses => &self.cache_misses,
            Counter::CacheErrors => &self.cache_errors,
            Counter::StoreReads => &self.store_reads,
            Counter::LostRaces => &self.lost_races,
            Counter::FailedInvalidations => &self.failed_invalidations,
        };
        slot.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            store_reads: self.store_reads.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
            failed_invalidations: self.failed_invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = Counters::default();
        counters.add(Counter::CacheHits, 3);
        counters.add(Counter::CacheHits, 2);
        counters.add(Counter::LostRaces, 1);
        counters.add(Counter::StoreReads, 0);

        let stats = counters.snapshot();
        assert_eq!(stats.cache_hits, 5);
        assert_eq!(stats.lost_races, 1);
        assert_eq!(stats.store_reads, 0);
    }
}
