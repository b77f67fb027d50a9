//! Entity capability trait.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::KeyError;
use crate::key::Key;

/// A value that can be stored, cached and addressed by a [`Key`].
///
/// Each entity type supplies its own key accessor and assigner; the
/// coordinator never inspects entity fields beyond these two methods and the
/// serde representation.
///
/// # Implementation Requirements
///
/// - `key()` derives the key from the entity's own fields. It returns an
///   incomplete key when the id has not been assigned yet.
/// - `set_key()` writes an assigned key back into those fields so that a
///   following `key()` returns it.
/// - The serde form is what the distributed cache stores, so it must carry
///   every field a reader needs.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Resolve this entity's key.
    fn key(&self) -> Result<Key, KeyError>;

    /// Store `key` into this entity's key fields.
    fn set_key(&mut self, key: &Key);
}
