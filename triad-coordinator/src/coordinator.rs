//! Coordinator: the shared half of the caching pipeline.
//!
//! A [`Coordinator`] owns the handles to the datastore and the distributed
//! cache, the codec, the configuration and the counters. It is `Sync` and is
//! meant to be shared by every request of a process; each request opens its
//! own [`Session`], which owns the memory cache.

use std::collections::HashSet;
use std::fmt;

use triad_core::{
    CacheError, CoordinatorConfig, Entity, Key, TriadError, TriadResult, ValidationError,
};
use triad_storage::{CacheItem, Codec, Datastore, DistributedCache, JsonCodec};

use crate::batch::BatchPlanner;
use crate::latency::{Call, Latency};
use crate::session::Session;
use crate::stats::{CoordinatorStats, Counter, Counters};

/// Severity of an event passed to [`Coordinator::report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    /// Returned to the caller.
    Error,
    /// Absorbed; the operation carried on without the cache.
    Warn,
    /// Expected under concurrency, such as a lost populate.
    Info,
}

/// Shared entry point to the three tiers.
///
/// # Example
///
/// ```ignore
/// let coordinator = Coordinator::new(MemoryDatastore::new(), InMemoryDistributedCache::new())
///     .with_config(CoordinatorConfig::default().with_log_errors(false))?;
///
/// let mut session = coordinator.session();
/// let key = session.put(&mut widget)?;
/// ```
pub struct Coordinator<S, D, C = JsonCodec> {
    pub(crate) store: S,
    pub(crate) cache: D,
    pub(crate) codec: C,
    pub(crate) config: CoordinatorConfig,
    pub(crate) latency: Latency,
    counters: Counters,
}

impl<S: Datastore, D: DistributedCache> Coordinator<S, D, JsonCodec> {
    /// Create a coordinator with the JSON codec and the default
    /// configuration.
    pub fn new(store: S, cache: D) -> Self {
        let config = CoordinatorConfig::default();
        Self {
            store,
            cache,
            codec: JsonCodec,
            latency: Latency::new(config.simulated_latency),
            config,
            counters: Counters::default(),
        }
    }
}

impl<S: Datastore, D: DistributedCache, C: Codec> Coordinator<S, D, C> {
    /// Replace the codec used for distributed cache values.
    pub fn with_codec<C2: Codec>(self, codec: C2) -> Coordinator<S, D, C2> {
        Coordinator {
            store: self.store,
            cache: self.cache,
            codec,
            config: self.config,
            latency: self.latency,
            counters: self.counters,
        }
    }

    /// Replace the configuration after validating it.
    pub fn with_config(mut self, config: CoordinatorConfig) -> TriadResult<Self> {
        config.validate()?;
        self.latency = Latency::new(config.simulated_latency);
        self.config = config;
        Ok(self)
    }

    /// Open a session with an empty memory cache.
    pub fn session(&self) -> Session<'_, S, D, C> {
        Session::new(self)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &D {
        &self.cache
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CoordinatorStats {
        self.counters.snapshot()
    }

    pub(crate) fn count(&self, counter: Counter, n: usize) {
        self.counters.add(counter, n);
    }

    /// Chunked access to `store`, which is either the root store or a
    /// transaction handle.
    pub(crate) fn planner<'a>(&'a self, store: &'a S) -> BatchPlanner<'a, S> {
        BatchPlanner::new(
            store,
            self.latency,
            self.config.get_batch_limit,
            self.config.put_batch_limit,
            self.config.delete_batch_limit,
        )
    }

    /// Log an event if `log_errors` is enabled. Every error, absorbed
    /// failure and race the coordinator observes goes through here.
    pub(crate) fn report(&self, severity: Severity, operation: &'static str, err: &dyn fmt::Display) {
        if !self.config.log_errors {
            return;
        }
        match severity {
            Severity::Error => tracing::error!(operation, error = %err, "triad operation failed"),
            Severity::Warn => tracing::warn!(operation, error = %err, "triad cache call failed"),
            Severity::Info => tracing::info!(operation, detail = %err, "triad race detected"),
        }
    }

    /// Log `err` as returned by `operation` and hand it back.
    pub(crate) fn fail(&self, operation: &'static str, err: TriadError) -> TriadError {
        self.report(Severity::Error, operation, &err);
        err
    }

    /// Add `items` to the distributed cache without overwriting.
    ///
    /// Returns the keys whose add lost to a value cached concurrently. Other
    /// cache failures are logged and absorbed.
    pub(crate) fn populate(&self, items: Vec<CacheItem>, operation: &'static str) -> HashSet<String> {
        if items.is_empty() {
            return HashSet::new();
        }
        let outcome = self.cache.add_multi(items);
        self.latency.pause(Call::CacheAdd);
        match outcome {
            Ok(()) => HashSet::new(),
            Err(CacheError::NotStored { keys }) => {
                self.report(
                    Severity::Info,
                    operation,
                    &format!(
                        "{} concurrent read(s) cached the same entities first",
                        keys.len()
                    ),
                );
                self.count(Counter::LostRaces, keys.len());
                keys.into_iter().collect()
            }
            Err(e) => {
                self.report(Severity::Warn, operation, &e);
                self.count(Counter::CacheErrors, 1);
                HashSet::new()
            }
        }
    }

    /// Best-effort removal of `keys` from the distributed cache after a
    /// datastore write or delete returned.
    pub(crate) fn invalidate(&self, keys: &[String], operation: &'static str) {
        if keys.is_empty() {
            return;
        }
        let outcome = self.cache.delete_multi(keys);
        self.latency.pause(Call::CacheDelete);
        if let Err(e) = outcome {
            self.report(Severity::Warn, operation, &e);
            self.count(Counter::FailedInvalidations, keys.len());
        }
    }
}

/// Resolve the key of every entity.
pub(crate) fn resolve_keys<E: Entity>(entities: &[E]) -> TriadResult<Vec<Key>> {
    entities
        .iter()
        .enumerate()
        .map(|(index, entity)| {
            entity
                .key()
                .map_err(|source| TriadError::from(ValidationError::UnresolvableKey { index, source }))
        })
        .collect()
}

/// Reject the call if any key is incomplete. Reads and deletes need
/// assigned ids.
pub(crate) fn require_complete(keys: &[Key], operation: &'static str) -> TriadResult<()> {
    match keys.iter().position(|key| !key.is_complete()) {
        None => Ok(()),
        Some(index) => Err(ValidationError::IncompleteKey {
            index,
            key: keys[index].clone(),
            operation,
        }
        .into()),
    }
}

/// Reject a `*_complete` write if any key is incomplete.
pub(crate) fn require_assigned(keys: &[Key]) -> TriadResult<()> {
    match keys.iter().position(|key| !key.is_complete()) {
        None => Ok(()),
        Some(index) => Err(TriadError::IncompleteKey {
            index,
            key: keys[index].clone(),
        }),
    }
}
