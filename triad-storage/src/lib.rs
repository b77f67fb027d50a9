//! Triad Storage - Datastore and Distributed Cache Contracts
//!
//! Defines the two shared tiers the coordinator talks to, plus in-memory
//! implementations of both used by the tests and by local deployments.

pub mod cache;
pub mod datastore;
pub mod memory_store;

pub use cache::{
    CacheItem, CacheStats, Codec, DistributedCache, InMemoryDistributedCache, JsonCodec,
};
pub use datastore::Datastore;
pub use memory_store::{MemoryDatastore, Operation, RecordedCall, StoreLimits};
