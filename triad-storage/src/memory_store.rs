//! In-memory datastore.
//!
//! A complete [`Datastore`] used by the test suites and by embedders that
//! want a local store. It keeps the behaviors the coordinator depends on:
//!
//! - per-call batch ceilings ([`StoreLimits`])
//! - numeric id allocation for incomplete keys
//! - optimistic transactions with commit-time conflict detection and retry
//! - entity group limits for single-group and cross-group transactions
//!
//! It also records every call and can inject failures and conflicts, so tests
//! can assert chunking and partial-failure behavior.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use triad_core::{
    DatastoreError, Entity, Key, KeyId, MultiError, TransactionOptions, DEFAULT_DELETE_BATCH_LIMIT,
    DEFAULT_GET_BATCH_LIMIT, DEFAULT_PUT_BATCH_LIMIT,
};

use crate::datastore::Datastore;

/// Entity groups a single-group transaction may touch.
const SINGLE_GROUP_LIMIT: usize = 1;

/// Entity groups a cross-group transaction may touch.
const CROSS_GROUP_LIMIT: usize = 25;

/// Kinds of datastore calls, for recording and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Put,
    Delete,
    Commit,
}

/// Per-call item ceilings enforced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub get: usize,
    pub put: usize,
    pub delete: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            get: DEFAULT_GET_BATCH_LIMIT,
            put: DEFAULT_PUT_BATCH_LIMIT,
            delete: DEFAULT_DELETE_BATCH_LIMIT,
        }
    }
}

/// A recorded datastore call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub operation: Operation,
    pub items: usize,
    pub transactional: bool,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    value: Value,
}

#[derive(Debug, Default)]
struct StoreState {
    entities: HashMap<String, StoredEntity>,
    /// Bumped on every write or delete, including deletes of absent keys.
    versions: HashMap<String, u64>,
}

impl StoreState {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn write(&mut self, key: String, entity: Option<StoredEntity>) {
        *self.versions.entry(key.clone()).or_insert(0) += 1;
        match entity {
            Some(entity) => {
                self.entities.insert(key, entity);
            }
            None => {
                self.entities.remove(&key);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining successful calls before the next injected failure.
    fail_after: HashMap<Operation, usize>,
    /// Commits that will report a conflict regardless of state.
    forced_conflicts: usize,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<StoreState>,
    limits: StoreLimits,
    next_id: AtomicI64,
    calls: Mutex<Vec<RecordedCall>>,
    faults: Mutex<Faults>,
}

#[derive(Debug)]
struct TxnState {
    read_only: bool,
    group_limit: usize,
    groups: HashSet<String>,
    /// Pending writes; `None` is a delete.
    writes: HashMap<String, Option<StoredEntity>>,
    /// Versions observed by reads, validated at commit.
    read_versions: HashMap<String, u64>,
}

impl TxnState {
    fn new(options: &TransactionOptions) -> Self {
        Self {
            read_only: options.read_only,
            group_limit: if options.cross_group {
                CROSS_GROUP_LIMIT
            } else {
                SINGLE_GROUP_LIMIT
            },
            groups: HashSet::new(),
            writes: HashMap::new(),
            read_versions: HashMap::new(),
        }
    }

    fn touch(&mut self, key: &Key) -> Result<(), DatastoreError> {
        self.groups.insert(entity_group(key));
        if self.groups.len() > self.group_limit {
            return Err(DatastoreError::TooManyEntityGroups {
                groups: self.groups.len(),
                limit: self.group_limit,
            });
        }
        Ok(())
    }
}

/// In-memory [`Datastore`].
///
/// Clones share the same underlying data. A clone handed to a transaction's
/// unit of work additionally carries that transaction's pending state.
#[derive(Debug, Clone)]
pub struct MemoryDatastore {
    shared: Arc<Shared>,
    txn: Option<Arc<Mutex<TxnState>>>,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::with_limits(StoreLimits::default())
    }
}

impl MemoryDatastore {
    /// Create an empty store with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with custom per-call limits.
    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(StoreState::default()),
                limits,
                next_id: AtomicI64::new(0),
                calls: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
            }),
            txn: None,
        }
    }

    /// The per-call limits.
    pub fn limits(&self) -> StoreLimits {
        self.shared.limits
    }

    /// Returns true if this handle belongs to a running transaction.
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Number of committed entities.
    pub fn len(&self) -> usize {
        self.shared
            .state
            .read()
            .map(|state| state.entities.len())
            .unwrap_or(0)
    }

    /// Returns true if no entities are committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a committed entity exists for `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.shared
            .state
            .read()
            .map(|state| state.entities.contains_key(&key.encode()))
            .unwrap_or(false)
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of recorded calls of `operation`.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Item counts of the recorded calls of `operation`, oldest first.
    pub fn batch_sizes(&self, operation: Operation) -> Vec<usize> {
        self.calls()
            .iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.items)
            .collect()
    }

    /// Forget all recorded calls.
    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.shared.calls.lock() {
            calls.clear();
        }
    }

    /// Let `successes` more calls of `operation` through, then fail the next
    /// one with [`DatastoreError::Unavailable`].
    pub fn fail_after(&self, operation: Operation, successes: usize) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.fail_after.insert(operation, successes);
        }
    }

    /// Make the next `count` commits report a conflict.
    pub fn force_conflicts(&self, count: usize) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.forced_conflicts = count;
        }
    }

    fn record(&self, operation: Operation, items: usize) -> Result<(), DatastoreError> {
        self.shared
            .calls
            .lock()
            .map_err(|_| DatastoreError::LockPoisoned)?
            .push(RecordedCall {
                operation,
                items,
                transactional: self.txn.is_some(),
            });

        let mut faults = self
            .shared
            .faults
            .lock()
            .map_err(|_| DatastoreError::LockPoisoned)?;
        if let Some(remaining) = faults.fail_after.get_mut(&operation) {
            if *remaining == 0 {
                faults.fail_after.remove(&operation);
                return Err(DatastoreError::Unavailable {
                    reason: format!("injected {:?} failure", operation),
                });
            }
            *remaining -= 1;
        }
        Ok(())
    }

    fn begin_call(
        &self,
        operation: Operation,
        keys: usize,
        entities: usize,
    ) -> Result<(), DatastoreError> {
        self.record(operation, keys)?;
        if keys != entities {
            return Err(DatastoreError::LengthMismatch { keys, entities });
        }
        let limit = match operation {
            Operation::Get => self.shared.limits.get,
            Operation::Put => self.shared.limits.put,
            Operation::Delete => self.shared.limits.delete,
            Operation::Commit => usize::MAX,
        };
        if keys > limit {
            return Err(DatastoreError::BatchTooLarge { len: keys, limit });
        }
        Ok(())
    }

    fn allocate(&self, key: &Key) -> Result<Key, DatastoreError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        key.complete_with(KeyId::Int(id))
            .map_err(|e| DatastoreError::InvalidKey {
                key: key.encode(),
                reason: e.to_string(),
            })
    }

    fn commit(&self, txn: &Mutex<TxnState>) -> Result<(), DatastoreError> {
        self.record(Operation::Commit, 0)?;

        {
            let mut faults = self
                .shared
                .faults
                .lock()
                .map_err(|_| DatastoreError::LockPoisoned)?;
            if faults.forced_conflicts > 0 {
                faults.forced_conflicts -= 1;
                return Err(DatastoreError::ConcurrentTransaction);
            }
        }

        let mut txn = txn.lock().map_err(|_| DatastoreError::LockPoisoned)?;
        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| DatastoreError::LockPoisoned)?;

        let conflicted = txn
            .read_versions
            .iter()
            .any(|(key, version)| state.version(key) != *version);
        if conflicted {
            return Err(DatastoreError::ConcurrentTransaction);
        }

        for (key, entity) in txn.writes.drain() {
            state.write(key, entity);
        }
        Ok(())
    }
}

impl Datastore for MemoryDatastore {
    fn get_multi<E: Entity>(&self, keys: &[Key], dst: &mut [E]) -> Result<(), DatastoreError> {
        self.begin_call(Operation::Get, keys.len(), dst.len())?;

        let mut txn = match &self.txn {
            Some(txn) => Some(txn.lock().map_err(|_| DatastoreError::LockPoisoned)?),
            None => None,
        };
        let state = self
            .shared
            .state
            .read()
            .map_err(|_| DatastoreError::LockPoisoned)?;

        let mut multi = MultiError::new(keys.len());
        for (index, (key, slot)) in keys.iter().zip(dst.iter_mut()).enumerate() {
            if !key.is_complete() {
                multi.set(
                    index,
                    Some(DatastoreError::InvalidKey {
                        key: key.encode(),
                        reason: "cannot load an incomplete key".to_string(),
                    }),
                );
                continue;
            }

            let encoded = key.encode();
            let stored = match txn.as_deref_mut() {
                Some(txn) => {
                    txn.touch(key)?;
                    match txn.writes.get(&encoded) {
                        Some(pending) => pending.clone(),
                        None => {
                            txn.read_versions
                                .entry(encoded.clone())
                                .or_insert_with(|| state.version(&encoded));
                            state.entities.get(&encoded).cloned()
                        }
                    }
                }
                None => state.entities.get(&encoded).cloned(),
            };

            let outcome = match stored {
                None => Some(DatastoreError::NoSuchEntity),
                Some(stored) => match serde_json::from_value::<E>(stored.value) {
                    Ok(mut entity) => {
                        entity.set_key(key);
                        *slot = entity;
                        None
                    }
                    Err(e) => Some(DatastoreError::FieldMismatch {
                        key: encoded,
                        reason: e.to_string(),
                    }),
                },
            };
            multi.set(index, outcome);
        }

        if multi.has_errors() {
            Err(DatastoreError::Multi(multi))
        } else {
            Ok(())
        }
    }

    fn put_multi<E: Entity>(&self, keys: &[Key], src: &[E]) -> Result<Vec<Key>, DatastoreError> {
        self.begin_call(Operation::Put, keys.len(), src.len())?;

        let mut multi = MultiError::new(keys.len());
        let mut values = Vec::with_capacity(src.len());
        for (index, (key, entity)) in keys.iter().zip(src).enumerate() {
            match serde_json::to_value(entity) {
                Ok(value) => values.push(value),
                Err(e) => {
                    multi.set(
                        index,
                        Some(DatastoreError::Serialization {
                            key: key.encode(),
                            reason: e.to_string(),
                        }),
                    );
                    values.push(Value::Null);
                }
            }
        }
        if multi.has_errors() {
            for index in 0..multi.len() {
                if multi.get(index).is_none() {
                    multi.set(index, Some(DatastoreError::NotWritten));
                }
            }
            return Err(DatastoreError::Multi(multi));
        }

        let mut txn = match &self.txn {
            Some(txn) => {
                let txn = txn.lock().map_err(|_| DatastoreError::LockPoisoned)?;
                if txn.read_only {
                    return Err(DatastoreError::ReadOnlyTransaction);
                }
                Some(txn)
            }
            None => None,
        };

        let assigned = keys
            .iter()
            .map(|key| {
                if key.is_complete() {
                    Ok(key.clone())
                } else {
                    self.allocate(key)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        match txn.as_deref_mut() {
            Some(txn) => {
                for key in &assigned {
                    txn.touch(key)?;
                }
                for (key, value) in assigned.iter().zip(values) {
                    txn.writes.insert(key.encode(), Some(StoredEntity { value }));
                }
            }
            None => {
                let mut state = self
                    .shared
                    .state
                    .write()
                    .map_err(|_| DatastoreError::LockPoisoned)?;
                for (key, value) in assigned.iter().zip(values) {
                    state.write(key.encode(), Some(StoredEntity { value }));
                }
            }
        }

        Ok(assigned)
    }

    fn delete_multi(&self, keys: &[Key]) -> Result<(), DatastoreError> {
        self.begin_call(Operation::Delete, keys.len(), keys.len())?;

        if let Some(key) = keys.iter().find(|key| !key.is_complete()) {
            return Err(DatastoreError::InvalidKey {
                key: key.encode(),
                reason: "cannot delete an incomplete key".to_string(),
            });
        }

        match &self.txn {
            Some(txn) => {
                let mut txn = txn.lock().map_err(|_| DatastoreError::LockPoisoned)?;
                if txn.read_only {
                    return Err(DatastoreError::ReadOnlyTransaction);
                }
                for key in keys {
                    txn.touch(key)?;
                }
                for key in keys {
                    txn.writes.insert(key.encode(), None);
                }
            }
            None => {
                let mut state = self
                    .shared
                    .state
                    .write()
                    .map_err(|_| DatastoreError::LockPoisoned)?;
                for key in keys {
                    state.write(key.encode(), None);
                }
            }
        }
        Ok(())
    }

    fn run_in_transaction<F, Err>(&self, options: &TransactionOptions, mut f: F) -> Result<(), Err>
    where
        F: FnMut(&Self) -> Result<(), Err>,
        Err: From<DatastoreError>,
    {
        if self.txn.is_some() {
            return Err(DatastoreError::NestedTransaction.into());
        }

        let attempts = options.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let txn = Arc::new(Mutex::new(TxnState::new(options)));
            let handle = MemoryDatastore {
                shared: Arc::clone(&self.shared),
                txn: Some(Arc::clone(&txn)),
            };

            f(&handle)?;

            match self.commit(&txn) {
                Ok(()) => return Ok(()),
                Err(DatastoreError::ConcurrentTransaction) if attempt < attempts => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Root ancestor of `key`, encoded. Entities sharing it form one group.
fn entity_group(key: &Key) -> String {
    let mut root = key;
    while let Some(parent) = root.parent() {
        root = parent;
    }
    root.encode()
}
