//! Simulated call latency.
//!
//! When a [`LatencyProfile`] is configured, every datastore and distributed
//! cache call is followed by a random sleep. Widening the window between a
//! read and its populate is how the race tests make interleavings likely.

use std::time::Duration;

use rand::Rng;
use triad_core::LatencyProfile;

/// Which kind of call just completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    StoreGet,
    StorePut,
    StoreDelete,
    CacheGet,
    CacheAdd,
    CacheDelete,
}

/// Sleeps after calls according to an optional profile.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Latency {
    profile: Option<LatencyProfile>,
}

impl Latency {
    pub(crate) fn new(profile: Option<LatencyProfile>) -> Self {
        Self { profile }
    }

    /// Upper bound for `call`, zero when disabled.
    pub(crate) fn bound(&self, call: Call) -> Duration {
        let Some(profile) = self.profile else {
            return Duration::ZERO;
        };
        match call {
            Call::StoreGet => profile.datastore_get,
            Call::StorePut => profile.datastore_put,
            Call::StoreDelete => profile.datastore_delete,
            Call::CacheGet => profile.cache_get,
            Call::CacheAdd => profile.cache_add,
            Call::CacheDelete => profile.cache_delete,
        }
    }

    /// Sleep for a random duration in `[0, bound)`.
    pub(crate) fn pause(&self, call: Call) {
        let bound = self.bound(call);
        if bound.is_zero() {
            return;
        }
        let nanos = u64::try_from(bound.as_nanos()).unwrap_or(u64::MAX);
        let delay = rand::rng().random_range(0..nanos);
        std::thread::sleep(Duration::from_nanos(delay));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_disabled_by_default() {
        let latency = Latency::default();
        assert_eq!(latency.bound(Call::StoreGet), Duration::ZERO);

        let start = Instant::now();
        latency.pause(Call::StorePut);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_laggy_bounds() {
        let latency = Latency::new(Some(LatencyProfile::laggy()));
        assert_eq!(latency.bound(Call::StoreGet), Duration::from_millis(10));
        assert_eq!(latency.bound(Call::StorePut), Duration::from_millis(15));
        assert_eq!(latency.bound(Call::StoreDelete), Duration::from_millis(5));
        assert_eq!(latency.bound(Call::CacheGet), Duration::from_millis(2));
        assert_eq!(latency.bound(Call::CacheAdd), Duration::from_millis(3));
        assert_eq!(latency.bound(Call::CacheDelete), Duration::from_millis(2));
    }

    #[test]
    fn test_pause_stays_under_bound() {
        let profile = LatencyProfile {
            cache_get: Duration::from_millis(5),
            ..LatencyProfile::default()
        };
        let latency = Latency::new(Some(profile));

        let start = Instant::now();
        latency.pause(Call::CacheGet);
        // Generous slack for scheduler jitter.
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
