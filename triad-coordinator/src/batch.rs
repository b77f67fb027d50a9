//! Batch planner.
//!
//! Splits arbitrarily long key lists into datastore-sized chunks and merges
//! the per-chunk outcomes back into one positional result, so callers cannot
//! tell a chunked call from a single unbounded one.
//!
//! All three operations are fail-fast: a chunk that fails as a whole stops
//! the remaining chunks. Effects of earlier chunks are kept, including ids
//! assigned to entities by earlier put chunks.

use triad_core::{DatastoreError, Entity, Key, MultiError};
use triad_storage::Datastore;

use crate::latency::{Call, Latency};

/// Result of a chunked put.
#[derive(Debug)]
pub(crate) struct PutOutcome {
    /// Length of the input prefix whose chunks were confirmed written.
    pub written: usize,
    pub result: Result<(), DatastoreError>,
}

/// Chunked access to one datastore handle.
pub(crate) struct BatchPlanner<'a, S> {
    store: &'a S,
    latency: Latency,
    get_limit: usize,
    put_limit: usize,
    delete_limit: usize,
}

impl<'a, S: Datastore> BatchPlanner<'a, S> {
    pub(crate) fn new(
        store: &'a S,
        latency: Latency,
        get_limit: usize,
        put_limit: usize,
        delete_limit: usize,
    ) -> Self {
        Self {
            store,
            latency,
            get_limit: get_limit.max(1),
            put_limit: put_limit.max(1),
            delete_limit: delete_limit.max(1),
        }
    }

    /// Load `keys` into `dst` chunk by chunk.
    ///
    /// Per-item failures of every chunk are merged into one
    /// [`DatastoreError::Multi`] indexed like `keys`.
    pub(crate) fn get<E: Entity>(&self, keys: &[Key], dst: &mut [E]) -> Result<(), DatastoreError> {
        if keys.len() != dst.len() {
            return Err(DatastoreError::LengthMismatch {
                keys: keys.len(),
                entities: dst.len(),
            });
        }

        let mut merged = MultiError::new(keys.len());
        for (start, end) in chunks(keys.len(), self.get_limit) {
            let outcome = self.store.get_multi(&keys[start..end], &mut dst[start..end]);
            self.latency.pause(Call::StoreGet);
            match outcome {
                Ok(()) => {}
                Err(DatastoreError::Multi(multi)) => {
                    for (offset, slot) in multi.into_slots().into_iter().enumerate() {
                        merged.set(start + offset, slot);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if merged.has_errors() {
            Err(DatastoreError::Multi(merged))
        } else {
            Ok(())
        }
    }

    /// Store `src` under `keys` chunk by chunk.
    ///
    /// Keys the datastore assigns are written back into both `keys` and the
    /// matching entity of `src` as soon as their chunk returns. A per-item
    /// failure inside a chunk is reported as a [`DatastoreError::Multi`]
    /// over the whole input: earlier chunks are empty slots, the failing
    /// chunk carries its own slots and everything after it is
    /// [`DatastoreError::NotWritten`].
    pub(crate) fn put<E: Entity>(&self, keys: &mut [Key], src: &mut [E]) -> PutOutcome {
        if keys.len() != src.len() {
            return PutOutcome {
                written: 0,
                result: Err(DatastoreError::LengthMismatch {
                    keys: keys.len(),
                    entities: src.len(),
                }),
            };
        }

        let total = keys.len();
        for (start, end) in chunks(total, self.put_limit) {
            let outcome = self.store.put_multi(&keys[start..end], &src[start..end]);
            self.latency.pause(Call::StorePut);

            let assigned = match outcome {
                Ok(assigned) if assigned.len() == end - start => assigned,
                Ok(assigned) => {
                    return PutOutcome {
                        written: start,
                        result: Err(DatastoreError::LengthMismatch {
                            keys: end - start,
                            entities: assigned.len(),
                        }),
                    };
                }
                Err(DatastoreError::Multi(multi)) => {
                    let mut merged = MultiError::new(total);
                    for (offset, slot) in multi.into_slots().into_iter().enumerate() {
                        merged.set(start + offset, slot);
                    }
                    for index in end..total {
                        merged.set(index, Some(DatastoreError::NotWritten));
                    }
                    return PutOutcome {
                        written: start,
                        result: Err(DatastoreError::Multi(merged)),
                    };
                }
                Err(e) => {
                    return PutOutcome {
                        written: start,
                        result: Err(e),
                    };
                }
            };

            for (offset, key) in assigned.into_iter().enumerate() {
                let index = start + offset;
                if !keys[index].is_complete() {
                    src[index].set_key(&key);
                    keys[index] = key;
                }
            }
        }

        PutOutcome {
            written: total,
            result: Ok(()),
        }
    }

    /// Delete `keys` chunk by chunk.
    pub(crate) fn delete(&self, keys: &[Key]) -> Result<(), DatastoreError> {
        for (start, end) in chunks(keys.len(), self.delete_limit) {
            let outcome = self.store.delete_multi(&keys[start..end]);
            self.latency.pause(Call::StoreDelete);
            outcome?;
        }
        Ok(())
    }
}

/// `[start, end)` bounds of consecutive chunks of at most `limit` items.
fn chunks(len: usize, limit: usize) -> impl Iterator<Item = (usize, usize)> {
    let limit = limit.max(1);
    (0..len)
        .step_by(limit)
        .map(move |start| (start, (start + limit).min(len)))
}
