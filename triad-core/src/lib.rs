//! Triad Core - Keys, Entities, Errors and Configuration
//!
//! Shared vocabulary for the Triad caching coordinator. All other crates
//! depend on this one. It holds no I/O and no caching logic.

pub mod config;
pub mod entity;
pub mod error;
pub mod key;

pub use config::{
    CoordinatorConfig, LatencyProfile, TransactionOptions, DEFAULT_DELETE_BATCH_LIMIT,
    DEFAULT_GET_BATCH_LIMIT, DEFAULT_PUT_BATCH_LIMIT, DEFAULT_TRANSACTION_ATTEMPTS,
};
pub use entity::Entity;
pub use error::{
    is_not_found, CacheError, CodecError, ConfigError, DatastoreError, KeyError, MultiError,
    TriadError, TriadResult, ValidationError,
};
pub use key::{Key, KeyId};
