//! Distributed cache tier.
//!
//! The distributed cache holds serialized entities under encoded keys and is
//! shared by every session. Two rules keep it coherent with the datastore:
//!
//! - it is populated only with add-if-absent, so a slow reader can never
//!   replace a value cached after a newer write
//! - it is invalidated only after the datastore write or delete returned
//!
//! [`InMemoryDistributedCache`] is the in-process implementation; [`Codec`]
//! controls the byte format.

pub mod codec;
pub mod in_memory;
pub mod traits;

pub use codec::{Codec, JsonCodec};
pub use in_memory::InMemoryDistributedCache;
pub use traits::{CacheItem, CacheStats, DistributedCache};
