//! Persistent store contract.
//!
//! The datastore is the single source of truth. Every call is batched, has a
//! hard ceiling on the number of items, and reports per-item outcomes through
//! [`DatastoreError::Multi`] so callers can tell which inputs failed.

use triad_core::{DatastoreError, Entity, Key, TransactionOptions};

/// Batched access to the authoritative entity store.
///
/// # Error Contract
///
/// - Per-item failures (including "not found") are returned as
///   `Err(DatastoreError::Multi(..))` with exactly one slot per input key.
///   Sibling items are unaffected.
/// - Any other error is a failure of the whole call.
///
/// # Transactions
///
/// [`Datastore::run_in_transaction`] hands the unit of work a transactional
/// handle of the same type. Calls made through that handle are isolated until
/// commit. On contention the store re-invokes the unit of work, up to
/// `options.attempts` times, so the unit of work must be safe to repeat.
pub trait Datastore: Send + Sync {
    /// Load the entities for `keys` into `dst`, index by index.
    ///
    /// Slots that fail are left untouched in `dst`.
    fn get_multi<E: Entity>(&self, keys: &[Key], dst: &mut [E]) -> Result<(), DatastoreError>;

    /// Store `src` under `keys`.
    ///
    /// Returns the final keys, index-aligned with the input: complete input
    /// keys are returned unchanged, incomplete ones are assigned an id.
    fn put_multi<E: Entity>(&self, keys: &[Key], src: &[E]) -> Result<Vec<Key>, DatastoreError>;

    /// Delete the entities for `keys`. Deleting an absent entity succeeds.
    fn delete_multi(&self, keys: &[Key]) -> Result<(), DatastoreError>;

    /// Run `f` inside a transaction, retrying on contention.
    ///
    /// An error returned by `f` aborts the transaction and is returned
    /// unchanged. Commit failures are converted with `From<DatastoreError>`.
    fn run_in_transaction<F, Err>(&self, options: &TransactionOptions, f: F) -> Result<(), Err>
    where
        Self: Sized,
        F: FnMut(&Self) -> Result<(), Err>,
        Err: From<DatastoreError>;
}
