//! Triad Coordinator - Three-Tier Caching in Front of a Datastore
//!
//! Reads consult the session memory cache (optionally), then the shared
//! distributed cache, then the datastore. Writes and deletes go to the
//! datastore first and only then invalidate the caches. Transactions bypass
//! both caches and buffer their effects until commit.
//!
//! # Example
//!
//! ```ignore
//! use triad_coordinator::Coordinator;
//! use triad_core::is_not_found;
//! use triad_storage::{InMemoryDistributedCache, MemoryDatastore};
//!
//! let coordinator = Coordinator::new(MemoryDatastore::new(), InMemoryDistributedCache::new());
//! let mut session = coordinator.session();
//!
//! let mut widgets = vec![Widget::with_id(1), Widget::with_id(2)];
//! if let Err(err) = session.get_multi(&mut widgets) {
//!     if is_not_found(&err, 1) {
//!         // widget 2 does not exist; widget 1 was loaded
//!     }
//! }
//! ```

mod batch;
pub mod coordinator;
mod latency;
pub mod memory;
pub mod session;
pub mod stats;
pub mod transaction;

pub use coordinator::Coordinator;
pub use memory::MemoryCache;
pub use session::Session;
pub use stats::CoordinatorStats;
pub use transaction::Transaction;
