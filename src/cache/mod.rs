//! Named cache stores for request/response pairs.
//!
//! The worker only talks to the [`CacheStorage`] and [`Cache`] ports. Two
//! backends implement them:
//! - [`SqliteStorage`] persists stores across restarts
//! - [`MemoryStorage`] keeps everything in process memory

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{Cache, CacheStorage};

#[cfg(test)]
pub use memory::MemoryCache;
#[cfg(test)]
pub use traits::CacheEntry;
