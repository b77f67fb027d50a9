//! Transactional sessions.
//!
//! A [`Transaction`] lives for exactly one attempt of a unit of work. Every
//! call goes straight to the datastore transaction handle, chunked like the
//! root path, and no cache tier is read or written. Writes and deletes are
//! recorded into two buffers instead; the owning session applies them to its
//! memory cache only after the datastore commits.
//!
//! Errors are returned unlogged. The unit of work may handle them; whatever
//! escapes it is logged once by [`Session::run_in_transaction`].
//!
//! [`Session::run_in_transaction`]: crate::Session::run_in_transaction

use std::collections::HashSet;

use triad_core::{DatastoreError, Entity, Key, KeyError, TriadError, TriadResult};
use triad_storage::{Codec, Datastore, DistributedCache, JsonCodec};

use crate::coordinator::{require_assigned, require_complete, resolve_keys, Coordinator};
use crate::memory::MemoryCache;
use crate::session::first_slot;

/// Cache-free session bound to one transaction attempt.
pub struct Transaction<'t, S, D, C = JsonCodec> {
    coordinator: &'t Coordinator<S, D, C>,
    store: &'t S,
    to_set: MemoryCache,
    to_delete: HashSet<String>,
}

impl<'t, S: Datastore, D: DistributedCache, C: Codec> Transaction<'t, S, D, C> {
    pub(crate) fn new(coordinator: &'t Coordinator<S, D, C>, store: &'t S) -> Self {
        Self {
            coordinator,
            store,
            to_set: MemoryCache::new(),
            to_delete: HashSet::new(),
        }
    }

    pub(crate) fn into_buffers(self) -> (MemoryCache, HashSet<String>) {
        (self.to_set, self.to_delete)
    }

    /// The datastore transaction handle.
    pub fn store(&self) -> &S {
        self.store
    }

    /// Number of entities that will be placed in the memory cache on commit.
    pub fn pending_sets(&self) -> usize {
        self.to_set.len()
    }

    /// Number of keys that will be removed from the memory cache on commit.
    pub fn pending_deletes(&self) -> usize {
        self.to_delete.len()
    }

    pub fn key<E: Entity>(&self, entity: &E) -> Option<Key> {
        entity.key().ok().filter(Key::is_complete)
    }

    pub fn key_error<E: Entity>(&self, entity: &E) -> Result<Key, KeyError> {
        entity.key()
    }

    pub fn get<E: Entity>(&mut self, entity: &mut E) -> TriadResult<()> {
        self.get_multi(std::slice::from_mut(entity))
            .map_err(first_slot)
    }

    /// Load `entities` from the datastore within the transaction.
    pub fn get_multi<E: Entity>(&mut self, entities: &mut [E]) -> TriadResult<()> {
        let keys = resolve_keys(entities)?;
        require_complete(&keys, "transaction get_multi")?;

        self.coordinator
            .planner(self.store)
            .get(&keys, entities)
            .map_err(TriadError::from)
    }

    pub fn put<E: Entity>(&mut self, entity: &mut E) -> TriadResult<Key> {
        let mut keys = self
            .put_multi(std::slice::from_mut(entity))
            .map_err(first_slot)?;
        keys.pop()
            .ok_or_else(|| DatastoreError::LengthMismatch { keys: 1, entities: 0 }.into())
    }

    /// Store `entities` within the transaction. Ids assigned by the
    /// datastore are written back into the entities.
    pub fn put_multi<E: Entity>(&mut self, entities: &mut [E]) -> TriadResult<Vec<Key>> {
        let keys = resolve_keys(entities)?;
        self.write(entities, keys)
    }

    pub fn put_complete<E: Entity>(&mut self, entity: &mut E) -> TriadResult<Key> {
        let mut keys = self
            .put_multi_complete(std::slice::from_mut(entity))
            .map_err(first_slot)?;
        keys.pop()
            .ok_or_else(|| DatastoreError::LengthMismatch { keys: 1, entities: 0 }.into())
    }

    pub fn put_multi_complete<E: Entity>(&mut self, entities: &mut [E]) -> TriadResult<Vec<Key>> {
        let keys = resolve_keys(entities)?;
        require_assigned(&keys)?;
        self.write(entities, keys)
    }

    fn write<E: Entity>(
        &mut self,
        entities: &mut [E],
        mut keys: Vec<Key>,
    ) -> TriadResult<Vec<Key>> {
        let outcome = self.coordinator.planner(self.store).put(&mut keys, entities);

        // Chunks the transaction accepted are committed with it, even if a
        // later chunk failed and the unit of work chose to carry on.
        for (key, entity) in keys[..outcome.written].iter().zip(entities.iter()) {
            let memkey = key.encode();
            self.to_delete.remove(&memkey);
            self.to_set.put(memkey, entity.clone());
        }

        match outcome.result {
            Ok(()) => Ok(keys),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&mut self, key: &Key) -> TriadResult<()> {
        self.delete_multi(std::slice::from_ref(key))
    }

    /// Delete `keys` within the transaction. Keys must be complete.
    pub fn delete_multi(&mut self, keys: &[Key]) -> TriadResult<()> {
        require_complete(keys, "transaction delete_multi")?;

        for key in keys {
            let memkey = key.encode();
            self.to_set.invalidate(&memkey);
            self.to_delete.insert(memkey);
        }

        self.coordinator
            .planner(self.store)
            .delete(keys)
            .map_err(TriadError::from)
    }
}
