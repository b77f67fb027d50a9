//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, TriadError, TriadResult};

/// Maximum keys per datastore read call.
pub const DEFAULT_GET_BATCH_LIMIT: usize = 1000;

/// Maximum entities per datastore write call.
pub const DEFAULT_PUT_BATCH_LIMIT: usize = 500;

/// Maximum keys per datastore delete call.
pub const DEFAULT_DELETE_BATCH_LIMIT: usize = 500;

/// Default number of attempts for a transaction.
pub const DEFAULT_TRANSACTION_ATTEMPTS: u32 = 3;

/// Coordinator configuration.
///
/// Owned by one coordinator instance; nothing here is process-global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Log every observed error through `tracing`.
    pub log_errors: bool,
    /// Serve reads from the session memory cache before going to the
    /// distributed cache. Off by default: reads always consult the shared
    /// tiers, and the memory cache only collects what was read or written.
    pub read_memory_cache: bool,
    /// Maximum keys per datastore read call.
    pub get_batch_limit: usize,
    /// Maximum entities per datastore write call.
    pub put_batch_limit: usize,
    /// Maximum keys per datastore delete call.
    pub delete_batch_limit: usize,
    /// Expiration attached to every item added to the distributed cache.
    pub cache_expiration: Option<Duration>,
    /// Random per-call delays, for exercising races in tests.
    pub simulated_latency: Option<LatencyProfile>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            log_errors: true,
            read_memory_cache: false,
            get_batch_limit: DEFAULT_GET_BATCH_LIMIT,
            put_batch_limit: DEFAULT_PUT_BATCH_LIMIT,
            delete_batch_limit: DEFAULT_DELETE_BATCH_LIMIT,
            cache_expiration: None,
            simulated_latency: None,
        }
    }
}

impl CoordinatorConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable error logging.
    pub fn with_log_errors(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    /// Enable or disable memory cache short-circuiting on reads.
    pub fn with_read_memory_cache(mut self, enabled: bool) -> Self {
        self.read_memory_cache = enabled;
        self
    }

    /// Set the per-call batch limits for reads, writes and deletes.
    pub fn with_batch_limits(mut self, get: usize, put: usize, delete: usize) -> Self {
        self.get_batch_limit = get;
        self.put_batch_limit = put;
        self.delete_batch_limit = delete;
        self
    }

    /// Set the distributed cache item expiration.
    pub fn with_cache_expiration(mut self, expiration: Duration) -> Self {
        self.cache_expiration = Some(expiration);
        self
    }

    /// Enable simulated per-call latency.
    pub fn with_simulated_latency(mut self, profile: LatencyProfile) -> Self {
        self.simulated_latency = Some(profile);
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every batch limit is greater than 0
    /// - `cache_expiration`, when set, is positive
    pub fn validate(&self) -> TriadResult<()> {
        let limits = [
            ("get_batch_limit", self.get_batch_limit),
            ("put_batch_limit", self.put_batch_limit),
            ("delete_batch_limit", self.delete_batch_limit),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(invalid(field, value.to_string(), "batch limit must be greater than 0"));
            }
        }

        if let Some(expiration) = self.cache_expiration {
            if expiration.is_zero() {
                return Err(invalid(
                    "cache_expiration",
                    format!("{:?}", expiration),
                    "cache_expiration must be positive",
                ));
            }
        }

        Ok(())
    }
}

/// Upper bounds for simulated latency, per call type.
///
/// Each call sleeps for a uniformly random duration in `[0, bound)`. A zero
/// bound disables the delay for that call type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyProfile {
    pub datastore_get: Duration,
    pub datastore_put: Duration,
    pub datastore_delete: Duration,
    pub cache_get: Duration,
    pub cache_add: Duration,
    pub cache_delete: Duration,
}

impl LatencyProfile {
    /// A profile shaped like a real datastore and memcache pair.
    pub fn laggy() -> Self {
        Self {
            datastore_get: Duration::from_millis(10),
            datastore_put: Duration::from_millis(15),
            datastore_delete: Duration::from_millis(5),
            cache_get: Duration::from_millis(2),
            cache_add: Duration::from_millis(3),
            cache_delete: Duration::from_millis(2),
        }
    }
}

/// Options for one `run_in_transaction` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    /// Allow the transaction to span multiple entity groups.
    pub cross_group: bool,
    /// Total attempts, including the first, before giving up on contention.
    pub attempts: u32,
    /// Reject writes inside the transaction.
    pub read_only: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            cross_group: false,
            attempts: DEFAULT_TRANSACTION_ATTEMPTS,
            read_only: false,
        }
    }
}

impl TransactionOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow cross-group transactions.
    pub fn with_cross_group(mut self, enabled: bool) -> Self {
        self.cross_group = enabled;
        self
    }

    /// Set the attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Make the transaction read-only.
    pub fn with_read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }

    /// Validate the options. `attempts` must be at least 1.
    pub fn validate(&self) -> TriadResult<()> {
        if self.attempts == 0 {
            return Err(invalid(
                "attempts",
                self.attempts.to_string(),
                "a transaction needs at least one attempt",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: String, reason: &str) -> TriadError {
    TriadError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}
