//! Error types for Triad operations

use std::fmt;
use thiserror::Error;

use crate::Key;

/// Key construction and decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Key kind must not be empty")]
    EmptyKind,

    #[error("Key name for {kind} must not be empty")]
    EmptyName { kind: String },

    #[error("Key id for {kind} must not be zero")]
    ZeroId { kind: String },

    #[error("Parent of {kind} key must be complete")]
    IncompleteParent { kind: String },

    #[error("Key {key} is already complete")]
    AlreadyComplete { key: String },

    #[error("Cannot resolve key: {reason}")]
    Unresolvable { reason: String },

    #[error("Malformed encoded key {input:?}: {reason}")]
    Malformed { input: String, reason: String },
}

/// Datastore errors, either for a single item or for a whole call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatastoreError {
    #[error("No such entity")]
    NoSuchEntity,

    #[error("Stored entity {key} does not match the destination type: {reason}")]
    FieldMismatch { key: String, reason: String },

    #[error("Invalid key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Batch of {len} items exceeds the limit of {limit}")]
    BatchTooLarge { len: usize, limit: usize },

    #[error("Mismatched batch: {keys} keys for {entities} entities")]
    LengthMismatch { keys: usize, entities: usize },

    #[error("Entity {key} could not be serialized: {reason}")]
    Serialization { key: String, reason: String },

    /// Item was not written because another item or chunk of the same call
    /// failed first.
    #[error("Not written: the batch failed before this item was stored")]
    NotWritten,

    #[error("{0}")]
    Multi(MultiError),

    #[error("Transaction touched {groups} entity groups, more than the {limit} allowed")]
    TooManyEntityGroups { groups: usize, limit: usize },

    #[error("Concurrent transaction conflict")]
    ConcurrentTransaction,

    #[error("Nested transactions are not supported")]
    NestedTransaction,

    #[error("Write attempted in a read-only transaction")]
    ReadOnlyTransaction,

    #[error("Datastore unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Datastore lock poisoned")]
    LockPoisoned,
}

impl DatastoreError {
    /// Returns true for the per-item "entity not found" outcome.
    pub fn is_no_such_entity(&self) -> bool {
        matches!(self, Self::NoSuchEntity)
    }
}

/// Positional per-item outcome of a batched call.
///
/// Slot `i` is `None` when item `i` succeeded and `Some(err)` when it failed.
/// The length always equals the length of the input batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    slots: Vec<Option<DatastoreError>>,
}

impl MultiError {
    /// Create an all-success multi-error of `len` slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Wrap existing slots.
    pub fn from_slots(slots: Vec<Option<DatastoreError>>) -> Self {
        Self { slots }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The error at `index`, if that slot failed.
    pub fn get(&self, index: usize) -> Option<&DatastoreError> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Record the outcome of slot `index`. Out-of-range indexes are ignored.
    pub fn set(&mut self, index: usize, outcome: Option<DatastoreError>) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = outcome;
        }
    }

    /// Iterate slots in input order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&DatastoreError>> {
        self.slots.iter().map(Option::as_ref)
    }

    /// Number of failed slots.
    pub fn error_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if any slot failed.
    pub fn has_errors(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    /// Returns true if slot `index` is the "entity not found" outcome.
    pub fn is_not_found(&self, index: usize) -> bool {
        self.get(index).is_some_and(DatastoreError::is_no_such_entity)
    }

    /// Consume into the raw slots.
    pub fn into_slots(self) -> Vec<Option<DatastoreError>> {
        self.slots
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut errors = self.slots.iter().flatten();
        match errors.next() {
            None => write!(f, "0 errors in batch of {}", self.slots.len()),
            Some(first) => {
                let others = errors.count();
                match others {
                    0 => write!(f, "{}", first),
                    1 => write!(f, "{} (and 1 other error)", first),
                    n => write!(f, "{} (and {} other errors)", first, n),
                }
            }
        }
    }
}

impl std::error::Error for MultiError {}

/// Distributed cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// An add-if-absent lost to an existing value. Benign: signals a race.
    #[error("Cache add lost for {} key(s)", .keys.len())]
    NotStored { keys: Vec<String> },

    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Entity serialization errors on the distributed cache path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    #[error("Decode failed: {reason}")]
    Decode { reason: String },
}

/// Argument validation errors. Raised before any I/O.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cannot resolve key of entity at index {index}: {source}")]
    UnresolvableKey { index: usize, source: KeyError },

    #[error("Incomplete key {key} at index {index} is not allowed for {operation}")]
    IncompleteKey {
        index: usize,
        key: Key,
        operation: &'static str,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Triad errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TriadError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A `*_complete` write received an entity without an assigned id.
    #[error("Incomplete key at index {index}: {key}")]
    IncompleteKey { index: usize, key: Key },

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Positional per-item outcome of a batched call.
    #[error("{0}")]
    Multi(MultiError),

    #[error("Datastore error: {0}")]
    Datastore(DatastoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<DatastoreError> for TriadError {
    fn from(err: DatastoreError) -> Self {
        match err {
            DatastoreError::Multi(multi) => TriadError::Multi(multi),
            other => TriadError::Datastore(other),
        }
    }
}

impl From<MultiError> for TriadError {
    fn from(err: MultiError) -> Self {
        TriadError::Multi(err)
    }
}

impl TriadError {
    /// Returns true for a single-entity "not found" error, as returned by
    /// `get`.
    pub fn is_no_such_entity(&self) -> bool {
        matches!(self, Self::Datastore(DatastoreError::NoSuchEntity))
    }

    /// The positional multi-error, if this is one.
    pub fn as_multi(&self) -> Option<&MultiError> {
        match self {
            Self::Multi(multi) => Some(multi),
            _ => None,
        }
    }
}

/// Returns true if `err` is a positional multi-error whose slot `index` is
/// "entity not found".
pub fn is_not_found(err: &TriadError, index: usize) -> bool {
    err.as_multi().is_some_and(|multi| multi.is_not_found(index))
}

/// Result type alias for Triad operations.
pub type TriadResult<T> = Result<T, TriadError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn partial_failure() -> TriadError {
        TriadError::Multi(MultiError::from_slots(vec![
            None,
            Some(DatastoreError::NoSuchEntity),
            None,
        ]))
    }

    #[test]
    fn test_is_not_found_by_slot() {
        let err = partial_failure();
        assert!(!is_not_found(&err, 0));
        assert!(is_not_found(&err, 1));
        assert!(!is_not_found(&err, 2));
        assert!(!is_not_found(&err, 3));
    }

    #[test]
    fn test_is_not_found_ignores_other_errors() {
        let err = TriadError::Datastore(DatastoreError::NoSuchEntity);
        assert!(!is_not_found(&err, 0));
        assert!(err.is_no_such_entity());

        let other = TriadError::Multi(MultiError::from_slots(vec![Some(
            DatastoreError::Unavailable {
                reason: "down".to_string(),
            },
        )]));
        assert!(!is_not_found(&other, 0));
    }

    #[test]
    fn test_multi_datastore_error_converts_to_multi() {
        let multi = MultiError::from_slots(vec![Some(DatastoreError::NoSuchEntity)]);
        let err: TriadError = DatastoreError::Multi(multi.clone()).into();
        assert_eq!(err, TriadError::Multi(multi));

        let err: TriadError = DatastoreError::ConcurrentTransaction.into();
        assert_eq!(
            err,
            TriadError::Datastore(DatastoreError::ConcurrentTransaction)
        );
    }

    #[test]
    fn test_multi_error_accessors() {
        let mut multi = MultiError::new(3);
        assert!(!multi.has_errors());
        assert_eq!(multi.len(), 3);

        multi.set(2, Some(DatastoreError::NoSuchEntity));
        multi.set(7, Some(DatastoreError::NoSuchEntity));

        assert!(multi.has_errors());
        assert_eq!(multi.error_count(), 1);
        assert_eq!(multi.get(2), Some(&DatastoreError::NoSuchEntity));
        assert_eq!(multi.get(0), None);
        assert_eq!(multi.iter().filter(Option::is_some).count(), 1);
    }

    #[test]
    fn test_multi_error_display() {
        assert_eq!(MultiError::new(2).to_string(), "0 errors in batch of 2");

        let one = MultiError::from_slots(vec![None, Some(DatastoreError::NoSuchEntity)]);
        assert_eq!(one.to_string(), "No such entity");

        let three = MultiError::from_slots(vec![
            Some(DatastoreError::NoSuchEntity),
            Some(DatastoreError::NoSuchEntity),
            Some(DatastoreError::NoSuchEntity),
        ]);
        assert_eq!(three.to_string(), "No such entity (and 2 other errors)");
    }

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::NotStored {
            keys: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Cache add lost for 2 key(s)");
    }

    #[test]
    fn test_validation_error_display() {
        let key = Key::incomplete("Order", None).expect("valid key");
        let err = TriadError::from(ValidationError::IncompleteKey {
            index: 4,
            key,
            operation: "get",
        });
        let msg = err.to_string();
        assert!(msg.contains("index 4"));
        assert!(msg.contains("Order:?"));
    }
}
