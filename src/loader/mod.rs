//! Loader Module
//!
//! The data-access contract a cache is constructed with. One loader exists
//! per logical table; it fetches, releases and (de)compresses record sets.

mod table;

pub use table::TableLoader;

use crate::cache::codec::{self, ScratchPool};
use crate::error::{LoadError, Result};
use crate::key::CacheKey;
use crate::record::{Record, RecordSet};

// == Loader Trait ==
/// Per-table data access object.
///
/// Must be safely callable from many threads at once for different keys.
pub trait Loader: Send + Sync + 'static {
    type Key: CacheKey;
    type Record: Record;

    /// Table name, used for registry lookups and logs (e.g. "TaxRulesRecord").
    fn name(&self) -> &str;

    /// Logical grouping used for capacity settings and stats (e.g. "Rules").
    fn cache_class(&self) -> &str;

    /// Fetches and materializes the record set for `key`.
    ///
    /// Must not mutate shared state outside the returned set. A timed-out
    /// fetch is reported as a retryable error.
    fn create(&self, key: &Self::Key) -> std::result::Result<RecordSet<Self::Record>, LoadError>;

    /// Releases whatever the set owns. Called once per materialized set, after
    /// no entry and no request scope can reach it any more.
    fn destroy(&self, _key: &Self::Key, _records: RecordSet<Self::Record>) {}

    /// Lossless, deterministic compression of a set.
    fn compress(&self, records: &RecordSet<Self::Record>) -> Result<Vec<u8>> {
        codec::compress(records)
    }

    /// Inverse of [`compress`](Self::compress). Temporary buffers come from
    /// the calling cache's `scratch` pool.
    fn decompress(&self, bytes: &[u8], scratch: &ScratchPool) -> Result<RecordSet<Self::Record>> {
        codec::decompress_with(bytes, scratch)
    }

    /// Bulk population for small reference tables; empty by default.
    fn load(&self) -> std::result::Result<Vec<(Self::Key, RecordSet<Self::Record>)>, LoadError> {
        Ok(Vec::new())
    }
}
