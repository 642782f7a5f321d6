//! Cache Module
//!
//! Keyed record cache with compressed cold entries, LRU demotion and eviction.

pub mod codec;
mod entry;
mod lru;
mod scope;
mod stats;
mod store;


// Re-export public types
pub use codec::{CompressedBlob, ScratchPool};
pub use entry::EntryStatus;
pub use lru::{AccessClock, LruTracker};
pub use scope::{RequestScope, ScopeIter, SharedRecords};
pub use stats::{CacheStats, StatsRecorder};
pub use store::{Cache, CompressionStatus, EntryDiagnostic};
