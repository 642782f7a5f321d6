//! Fare Cache - keyed, compressed record cache for fare and tax tables
//!
//! Caches immutable record sets per key with at-most-one load per key,
//! compressed cold entries, historical date buckets and per-call request
//! scopes, optional blob store persistence, plus a small admin HTTP
//! surface.

pub mod api;
pub mod blob_store;
pub mod cache;
pub mod config;
pub mod error;
pub mod historical;
pub mod key;
pub mod loader;
pub mod models;
pub mod record;
pub mod registry;
pub mod tables;
pub mod tasks;

pub use api::AppState;
pub use blob_store::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use cache::{Cache, CacheStats, CompressionStatus, RequestScope, SharedRecords};
pub use config::{CacheSettings, Config};
pub use error::{CacheError, LoadError, Result};
pub use historical::{BucketWidth, CalendarBucketer, DateRange, HistoricalBucketer, HistoricalCache};
pub use key::{CacheKey, HistoricalKey, ObjectKey};
pub use loader::{Loader, TableLoader};
pub use record::{Record, RecordSet, Validity};
pub use registry::{CacheRegistry, ManagedCache};
pub use tasks::spawn_maintenance_task;
