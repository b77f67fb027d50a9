//! Root sessions: the cached read, write and delete paths.

use std::collections::{HashMap, HashSet};

use triad_core::{
    DatastoreError, Entity, Key, KeyError, MultiError, TransactionOptions, TriadError, TriadResult,
};
use triad_storage::{CacheItem, Codec, Datastore, DistributedCache, JsonCodec};

use crate::coordinator::{require_assigned, require_complete, resolve_keys, Coordinator, Severity};
use crate::latency::Call;
use crate::memory::MemoryCache;
use crate::stats::Counter;
use crate::transaction::Transaction;

/// One request's view of the three tiers.
///
/// A session owns its [`MemoryCache`] and is not shared between threads.
/// Open one per request with [`Coordinator::session`].
pub struct Session<'c, S, D, C = JsonCodec> {
    coordinator: &'c Coordinator<S, D, C>,
    memory: MemoryCache,
}

impl<'c, S: Datastore, D: DistributedCache, C: Codec> Session<'c, S, D, C> {
    pub(crate) fn new(coordinator: &'c Coordinator<S, D, C>) -> Self {
        Self {
            coordinator,
            memory: MemoryCache::new(),
        }
    }

    pub fn coordinator(&self) -> &'c Coordinator<S, D, C> {
        self.coordinator
    }

    /// This session's memory cache.
    pub fn memory_cache(&self) -> &MemoryCache {
        &self.memory
    }

    /// The complete key of `entity`, or `None` if it cannot be resolved or
    /// has no id yet.
    pub fn key<E: Entity>(&self, entity: &E) -> Option<Key> {
        entity.key().ok().filter(Key::is_complete)
    }

    /// The key of `entity`, complete or not.
    pub fn key_error<E: Entity>(&self, entity: &E) -> Result<Key, KeyError> {
        entity.key()
    }

    /// Load `entity` by its key.
    ///
    /// A missing entity fails with `TriadError::Datastore(NoSuchEntity)`.
    pub fn get<E: Entity>(&mut self, entity: &mut E) -> TriadResult<()> {
        self.get_multi(std::slice::from_mut(entity))
            .map_err(first_slot)
    }

    /// Load every entity of `entities` by its key.
    ///
    /// Keys must be complete. Lookups go to the distributed cache first and
    /// to the datastore for the misses; entities read from the datastore are
    /// added to the distributed cache unless a concurrent reader cached them
    /// first. When `read_memory_cache` is enabled the session memory cache is
    /// consulted before either.
    ///
    /// Per-item failures, including missing entities, are returned as a
    /// positional [`TriadError::Multi`]; use [`triad_core::is_not_found`] to
    /// test a slot. Successful slots are filled even when others fail.
    pub fn get_multi<E: Entity>(&mut self, entities: &mut [E]) -> TriadResult<()> {
        const OP: &str = "get_multi";
        let co = self.coordinator;

        let keys = resolve_keys(entities)
            .and_then(|keys| require_complete(&keys, OP).map(|()| keys))
            .map_err(|e| co.fail(OP, e))?;
        let encoded: Vec<String> = keys.iter().map(Key::encode).collect();

        let mut pending = Vec::with_capacity(keys.len());
        let mut memory_hits = 0;
        for (index, memkey) in encoded.iter().enumerate() {
            if co.config.read_memory_cache {
                if let Some(hit) = self.memory.get::<E>(memkey) {
                    entities[index] = hit.clone();
                    memory_hits += 1;
                    continue;
                }
            }
            pending.push(index);
        }
        co.count(Counter::MemoryHits, memory_hits);
        if pending.is_empty() {
            return Ok(());
        }

        let misses = self.read_distributed(entities, &keys, &encoded, pending);
        if misses.is_empty() {
            return Ok(());
        }
        self.read_store(entities, &keys, &encoded, misses)
    }

    /// Fill `pending` slots from the distributed cache. Returns the slots
    /// still missing.
    fn read_distributed<E: Entity>(
        &mut self,
        entities: &mut [E],
        keys: &[Key],
        encoded: &[String],
        pending: Vec<usize>,
    ) -> Vec<usize> {
        const OP: &str = "get_multi";
        let co = self.coordinator;

        let lookup: Vec<String> = pending.iter().map(|&index| encoded[index].clone()).collect();
        let outcome = co.cache.get_multi(&lookup);
        co.latency.pause(Call::CacheGet);
        let found = outcome.unwrap_or_else(|e| {
            co.report(Severity::Warn, OP, &e);
            co.count(Counter::CacheErrors, 1);
            HashMap::new()
        });

        let mut hits = 0;
        let mut misses = Vec::new();
        let mut undecodable = Vec::new();
        for index in pending {
            let Some(item) = found.get(&encoded[index]) else {
                misses.push(index);
                continue;
            };
            match co.codec.decode::<E>(&item.value) {
                Ok(mut entity) => {
                    entity.set_key(&keys[index]);
                    self.memory.put(encoded[index].clone(), entity.clone());
                    entities[index] = entity;
                    hits += 1;
                }
                Err(e) => {
                    co.report(Severity::Warn, OP, &e);
                    undecodable.push(encoded[index].clone());
                    misses.push(index);
                }
            }
        }

        // An entry that cannot be decoded would win every later add and
        // keep the fresh value out of the cache.
        if !undecodable.is_empty() {
            co.invalidate(&undecodable, OP);
        }

        co.count(Counter::CacheHits, hits);
        co.count(Counter::CacheMisses, misses.len());
        misses
    }

    /// Fill `misses` slots from the datastore and populate both caches with
    /// what was found.
    fn read_store<E: Entity>(
        &mut self,
        entities: &mut [E],
        keys: &[Key],
        encoded: &[String],
        misses: Vec<usize>,
    ) -> TriadResult<()> {
        const OP: &str = "get_multi";
        let co = self.coordinator;

        let miss_keys: Vec<Key> = misses.iter().map(|&index| keys[index].clone()).collect();
        let mut fetched: Vec<E> = misses.iter().map(|&index| entities[index].clone()).collect();
        co.count(Counter::StoreReads, misses.len());

        let slots = match co.planner(&co.store).get(&miss_keys, &mut fetched) {
            Ok(()) => vec![None; misses.len()],
            Err(DatastoreError::Multi(multi)) => multi.into_slots(),
            Err(e) => return Err(co.fail(OP, e.into())),
        };

        let mut multi = MultiError::new(entities.len());
        let mut found = Vec::new();
        for ((index, entity), slot) in misses.into_iter().zip(fetched).zip(slots) {
            match slot {
                None => {
                    entities[index] = entity.clone();
                    found.push((index, entity));
                }
                Some(err) => multi.set(index, Some(err)),
            }
        }

        let mut items = Vec::with_capacity(found.len());
        let mut queued = HashSet::with_capacity(found.len());
        for (index, entity) in &found {
            // Repeated keys in one call are added once.
            if !queued.insert(encoded[*index].as_str()) {
                continue;
            }
            match co.codec.encode(entity) {
                Ok(bytes) => items.push(
                    CacheItem::new(encoded[*index].clone(), bytes)
                        .with_expiration(co.config.cache_expiration),
                ),
                Err(e) => co.report(Severity::Warn, OP, &e),
            }
        }
        let lost = co.populate(items, OP);
        for (index, entity) in found {
            // A lost populate means a fresher value may be cached; do not
            // pin the value just read in memory.
            if !lost.contains(&encoded[index]) {
                self.memory.put(encoded[index].clone(), entity);
            }
        }

        if multi.has_errors() {
            Err(co.fail(OP, TriadError::Multi(multi)))
        } else {
            Ok(())
        }
    }

    /// Store `entity`. An incomplete key is assigned by the datastore and
    /// written back into `entity`.
    pub fn put<E: Entity>(&mut self, entity: &mut E) -> TriadResult<Key> {
        let mut keys = self
            .put_multi(std::slice::from_mut(entity))
            .map_err(first_slot)?;
        keys.pop()
            .ok_or_else(|| DatastoreError::LengthMismatch { keys: 1, entities: 0 }.into())
    }

    /// Store every entity of `entities`.
    ///
    /// Writes go to the datastore in chunks. After the datastore returns,
    /// the written keys are invalidated in the distributed cache (never set)
    /// and the entities are placed in the memory cache.
    ///
    /// # Partial effects
    ///
    /// If a chunk fails, later chunks are not attempted. Earlier chunks stay
    /// written: their entities keep any ids the datastore assigned, and their
    /// keys are still invalidated in the distributed cache and evicted from
    /// the memory cache before the error is returned.
    pub fn put_multi<E: Entity>(&mut self, entities: &mut [E]) -> TriadResult<Vec<Key>> {
        const OP: &str = "put_multi";
        let keys = resolve_keys(entities).map_err(|e| self.coordinator.fail(OP, e))?;
        self.write(entities, keys, OP)
    }

    /// Like [`Session::put`], but fails without writing if the key is
    /// incomplete.
    pub fn put_complete<E: Entity>(&mut self, entity: &mut E) -> TriadResult<Key> {
        let mut keys = self
            .put_multi_complete(std::slice::from_mut(entity))
            .map_err(first_slot)?;
        keys.pop()
            .ok_or_else(|| DatastoreError::LengthMismatch { keys: 1, entities: 0 }.into())
    }

    /// Like [`Session::put_multi`], but fails without writing anything if
    /// any key is incomplete.
    pub fn put_multi_complete<E: Entity>(&mut self, entities: &mut [E]) -> TriadResult<Vec<Key>> {
        const OP: &str = "put_multi_complete";
        let co = self.coordinator;
        let keys = resolve_keys(entities)
            .and_then(|keys| require_assigned(&keys).map(|()| keys))
            .map_err(|e| co.fail(OP, e))?;
        self.write(entities, keys, OP)
    }

    fn write<E: Entity>(
        &mut self,
        entities: &mut [E],
        mut keys: Vec<Key>,
        operation: &'static str,
    ) -> TriadResult<Vec<Key>> {
        let co = self.coordinator;
        let outcome = co.planner(&co.store).put(&mut keys, entities);

        let written: Vec<String> = keys[..outcome.written].iter().map(Key::encode).collect();
        co.invalidate(&written, operation);

        match outcome.result {
            Ok(()) => {
                for (memkey, entity) in written.into_iter().zip(entities.iter()) {
                    self.memory.put(memkey, entity.clone());
                }
                Ok(keys)
            }
            Err(e) => {
                for memkey in &written {
                    self.memory.invalidate(memkey);
                }
                Err(co.fail(operation, e.into()))
            }
        }
    }

    /// Delete the entity stored under `key`.
    pub fn delete(&mut self, key: &Key) -> TriadResult<()> {
        self.delete_multi(std::slice::from_ref(key))
    }

    /// Delete the entities stored under `keys`. Keys must be complete.
    ///
    /// The datastore is called first. Afterwards every requested key is
    /// removed from the memory cache and invalidated in the distributed
    /// cache, even if a chunk failed, since earlier chunks may have been
    /// deleted.
    pub fn delete_multi(&mut self, keys: &[Key]) -> TriadResult<()> {
        const OP: &str = "delete_multi";
        let co = self.coordinator;
        require_complete(keys, OP).map_err(|e| co.fail(OP, e))?;

        let outcome = co.planner(&co.store).delete(keys);

        let encoded: Vec<String> = keys.iter().map(Key::encode).collect();
        for memkey in &encoded {
            self.memory.invalidate(memkey);
        }
        co.invalidate(&encoded, OP);

        outcome.map_err(|e| co.fail(OP, e.into()))
    }

    /// Run `f` in a datastore transaction.
    ///
    /// `f` receives a [`Transaction`] that bypasses both caches. The datastore
    /// may call `f` again on contention, each time with a fresh transaction,
    /// so `f` must be safe to repeat. On commit, entities written through the
    /// transaction are placed in this session's memory cache and deleted keys
    /// are removed from it. The distributed cache is not touched: other
    /// sessions may keep reading cached values of transactionally written
    /// entities until a later non-transactional write invalidates them.
    ///
    /// If `f` fails, or the transaction cannot commit, nothing in this
    /// session changes and the error is returned.
    pub fn run_in_transaction<F>(&mut self, options: &TransactionOptions, mut f: F) -> TriadResult<()>
    where
        F: FnMut(&mut Transaction<'_, S, D, C>) -> TriadResult<()>,
    {
        const OP: &str = "run_in_transaction";
        let co = self.coordinator;
        options.validate().map_err(|e| co.fail(OP, e))?;

        let mut committed = None;
        let result = co
            .store
            .run_in_transaction(options, |store: &S| -> TriadResult<()> {
                committed = None;
                let mut txn = Transaction::new(co, store);
                f(&mut txn)?;
                committed = Some(txn.into_buffers());
                Ok(())
            });

        match result {
            Ok(()) => {
                if let Some((to_set, to_delete)) = committed {
                    self.memory.absorb(to_set);
                    for memkey in &to_delete {
                        self.memory.invalidate(memkey);
                    }
                }
                Ok(())
            }
            Err(e) => Err(co.fail(OP, e)),
        }
    }
}

/// Unwrap slot 0 of a positional error, for the single-entity operations.
pub(crate) fn first_slot(err: TriadError) -> TriadError {
    match err {
        TriadError::Multi(multi) => match multi.into_slots().into_iter().next().flatten() {
            Some(slot) => slot.into(),
            None => DatastoreError::Unavailable {
                reason: "batch failed without an error for the entity".to_string(),
            }
            .into(),
        },
        other => other,
    }
}
