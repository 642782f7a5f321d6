//! In-memory table loader
//!
//! Serves record sets from a row table held in memory. Used for seeded
//! reference tables, dummy-object insertion and tests; it counts calls and can
//! inject failures and latency.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::cache::codec::{self, ScratchPool};
use crate::error::{CacheError, LoadError, Result};
use crate::key::CacheKey;
use crate::loader::Loader;
use crate::record::{Record, RecordSet};

type Select<K, R> = Box<dyn Fn(&K, &R) -> bool + Send + Sync>;
type KeyOf<K, R> = Box<dyn Fn(&R) -> K + Send + Sync>;

// == Table Loader ==
pub struct TableLoader<K, R> {
    name: String,
    cache_class: String,
    rows: RwLock<Vec<R>>,
    /// Row predicate standing in for the table's query
    select: Select<K, R>,
    /// Present when the table is eager-loaded at startup
    key_of: Option<KeyOf<K, R>>,
    latency: Mutex<Duration>,
    failures: Mutex<VecDeque<LoadError>>,
    corrupt_blobs: AtomicUsize,
    creates: AtomicUsize,
    destroys: AtomicUsize,
    decompressions: AtomicUsize,
}

impl<K: CacheKey, R: Record> TableLoader<K, R> {
    pub fn new(
        name: impl Into<String>,
        cache_class: impl Into<String>,
        rows: Vec<R>,
        select: impl Fn(&K, &R) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            cache_class: cache_class.into(),
            rows: RwLock::new(rows),
            select: Box::new(select),
            key_of: None,
            latency: Mutex::new(Duration::ZERO),
            failures: Mutex::new(VecDeque::new()),
            corrupt_blobs: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            decompressions: AtomicUsize::new(0),
        }
    }

    /// Enables [`Loader::load`], grouping rows by `key_of`.
    pub fn with_eager_load(mut self, key_of: impl Fn(&R) -> K + Send + Sync + 'static) -> Self {
        self.key_of = Some(Box::new(key_of));
        self
    }

    /// Simulated query latency for every `create`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// The next `create` call fails with `error`. Calls queue up.
    pub fn fail_next(&self, error: LoadError) {
        self.failures.lock().push_back(error);
    }

    /// The next `decompress` call fails as if the blob were corrupt.
    pub fn fail_next_decompress(&self) {
        self.corrupt_blobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn insert_row(&self, row: R) {
        self.rows.write().push(row);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn decompress_calls(&self) -> usize {
        self.decompressions.load(Ordering::SeqCst)
    }
}

impl<K: CacheKey, R: Record> Loader for TableLoader<K, R> {
    type Key = K;
    type Record = R;

    fn name(&self) -> &str {
        &self.name
    }

    fn cache_class(&self) -> &str {
        &self.cache_class
    }

    fn create(&self, key: &K) -> std::result::Result<RecordSet<R>, LoadError> {
        self.creates.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let records: RecordSet<R> = self
            .rows
            .read()
            .iter()
            .filter(|row| (self.select)(key, row))
            .cloned()
            .collect();
        debug!("{}: fetched {} rows for {}", self.name, records.len(), key.flat());
        Ok(records)
    }

    fn destroy(&self, _key: &K, _records: RecordSet<R>) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }

    fn decompress(&self, bytes: &[u8], scratch: &ScratchPool) -> Result<RecordSet<R>> {
        self.decompressions.fetch_add(1, Ordering::SeqCst);
        let corrupt = self
            .corrupt_blobs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if corrupt {
            return Err(CacheError::Compression(format!(
                "{}: corrupt blob of {} bytes",
                self.name,
                bytes.len()
            )));
        }
        codec::decompress_with(bytes, scratch)
    }

    fn load(&self) -> std::result::Result<Vec<(K, RecordSet<R>)>, LoadError> {
        let Some(key_of) = self.key_of.as_ref() else {
            return Ok(Vec::new());
        };

        let mut order: Vec<K> = Vec::new();
        let mut groups: HashMap<K, Vec<R>> = HashMap::new();
        for row in self.rows.read().iter() {
            let key = key_of(row);
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(row.clone());
        }

        Ok(order
            .into_iter()
            .filter_map(|key| {
                let rows = groups.remove(&key)?;
                Some((key, RecordSet::from(rows)))
            })
            .collect())
    }
}
