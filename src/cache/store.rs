//! Cache Store Module
//!
//! The keyed record cache: at-most-one load per key, promote-on-read of
//! compressed entries, hot-byte demotion and total-capacity eviction.
//!
//! Locking: the key map is sharded; each entry has its own mutex. A map shard
//! may be held while an entry mutex is taken, never the other way round.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blob_store::{decode_key, encode_key, BlobStore};
use crate::cache::codec::{CompressedBlob, ScratchPool};
use crate::cache::entry::{CacheEntry, EntryState, EntryStatus};
use crate::cache::lru::{AccessClock, LruTracker};
use crate::cache::scope::{RequestScope, SharedRecords};
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::config::CacheSettings;
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, ObjectKey};
use crate::loader::Loader;
use crate::record::RecordSet;

type Slot<R> = Arc<CacheEntry<R>>;

// == Compression Status ==
/// Whether [`Cache::get_compressed`] had to compress a hot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStatus {
    FreshlyCompressed,
    AlreadyCompressed,
}

// == Entry Diagnostic ==
/// One line of [`Cache::dump`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryDiagnostic {
    pub key: String,
    pub state: EntryStatus,
    pub approx_bytes: usize,
    pub record_count: usize,
}

impl fmt::Display for EntryDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}B {} records",
            self.key, self.state, self.approx_bytes, self.record_count
        )
    }
}

enum Retired {
    /// A load was in flight; its result will be dropped on publish
    Discarded,
    Tombstoned,
    AlreadyInvalid,
}

// == Cache ==
/// Keyed, compressed, thread-safe record cache over one [`Loader`].
pub struct Cache<L: Loader> {
    loader: Arc<L>,
    settings: CacheSettings,
    entries: DashMap<L::Key, Slot<L::Record>>,
    clock: AccessClock,
    /// Sum of `charged` over hot entries
    hot_bytes: AtomicUsize,
    counters: StatsRecorder,
    scratch: ScratchPool,
    demotion: Mutex<()>,
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl<L: Loader> Cache<L> {
    // == Constructor ==
    pub fn new(loader: Arc<L>, settings: CacheSettings) -> Self {
        Self {
            loader,
            settings,
            entries: DashMap::new(),
            clock: AccessClock::new(),
            hot_bytes: AtomicUsize::new(0),
            counters: StatsRecorder::new(),
            scratch: ScratchPool::default(),
            demotion: Mutex::new(()),
            blob_store: None,
        }
    }

    /// Writes every blob this cache compresses through to `store`, and
    /// removes persisted blobs of invalidated keys.
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn loader(&self) -> &Arc<L> {
        &self.loader
    }

    pub fn name(&self) -> &str {
        self.loader.name()
    }

    pub fn cache_class(&self) -> &str {
        self.loader.cache_class()
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Entries in the map, tombstones and in-flight loads included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hot_bytes(&self) -> usize {
        self.hot_bytes.load(Ordering::SeqCst)
    }

    // == Get ==
    /// Returns the records for `key` current as of `as_of`, loading them if needed.
    ///
    /// Blocks only while another thread loads the same key. A load failure is
    /// returned to this caller and to the threads that waited on the same
    /// attempt; nothing is cached for it.
    pub fn get(&self, key: &L::Key, as_of: NaiveDateTime) -> Result<RequestScope<L::Record>> {
        let records = self.resolve(key)?;
        Ok(RequestScope::current(records, as_of))
    }

    fn resolve(&self, key: &L::Key) -> Result<Arc<SharedRecords<L::Record>>> {
        loop {
            let tick = self.clock.tick();
            let (entry, owner) = self.entry_for(key, tick);
            if owner {
                return self.load(key, &entry);
            }

            entry.touch(tick);
            let state = entry.wait_ready();
            let blob = match &*state {
                EntryState::Hot { records, .. } => {
                    self.counters.record_hit();
                    return Ok(records.clone());
                }
                EntryState::Cold(blob) => blob.clone(),
                EntryState::Failed(error) => return Err(error.for_waiter()),
                // invalidated while we waited; start over as a fresh miss
                EntryState::Invalidated | EntryState::Loading => continue,
            };
            return self.promote(key, &entry, state, blob);
        }
    }

    /// Finds the live entry for `key` or installs a loading one. The second
    /// value is true when the caller installed it and must run the load.
    fn entry_for(&self, key: &L::Key, tick: u64) -> (Slot<L::Record>, bool) {
        let mut replaced = None;
        let found = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_replaceable() {
                    let fresh = Arc::new(CacheEntry::loading(tick));
                    replaced = Some(occupied.insert(fresh.clone()));
                    (fresh, true)
                } else {
                    (occupied.get().clone(), false)
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Arc::new(CacheEntry::loading(tick));
                vacant.insert(fresh.clone());
                (fresh, true)
            }
        };
        drop(replaced);
        found
    }

    // == Load ==
    fn load(&self, key: &L::Key, entry: &Slot<L::Record>) -> Result<Arc<SharedRecords<L::Record>>> {
        self.counters.record_miss();
        let guard = LoadGuard {
            cache: self,
            key,
            entry,
            armed: true,
        };
        let created = self.loader.create(key);
        guard.disarm();

        let set = match created {
            Ok(set) => set,
            Err(error) => {
                let error = error.into_cache_error(key.flat());
                warn!("{}: {}", self.name(), error);
                self.abandon_load(key, entry, error.clone());
                return Err(error);
            }
        };

        self.counters.record_load();
        let charged = self.charge_for(&set);
        let count = set.len();
        let records = Arc::new(self.materialize(key.clone(), set));

        let mut state = entry.lock();
        if entry.is_discarded() {
            *state = EntryState::Invalidated;
            drop(state);
            entry.notify_waiters();
            debug!("{}: dropped load of {}, invalidated in flight", self.name(), key.flat());
            return Ok(records);
        }
        self.hot_bytes.fetch_add(charged, Ordering::SeqCst);
        *state = EntryState::Hot {
            records: records.clone(),
            charged,
        };
        drop(state);
        entry.notify_waiters();
        debug!("{}: loaded {} ({} records)", self.name(), key.flat(), count);

        self.after_insert();
        Ok(records)
    }

    fn abandon_load(&self, key: &L::Key, entry: &Slot<L::Record>, error: CacheError) {
        self.counters.record_load_failure();
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry));
        entry.publish(EntryState::Failed(error));
    }

    /// Wraps a set so that `Loader::destroy` runs once the last view is gone.
    fn materialize(&self, key: L::Key, set: RecordSet<L::Record>) -> SharedRecords<L::Record> {
        let loader = self.loader.clone();
        SharedRecords::with_release(set, move |records| loader.destroy(&key, records))
    }

    /// Hot bytes a set counts for; sets under the threshold are exempt.
    fn charge_for(&self, set: &RecordSet<L::Record>) -> usize {
        if set.is_empty() || set.len() < self.settings.compression_threshold {
            0
        } else {
            set.memory_estimate()
        }
    }

    // == Promote ==
    /// Decompresses a cold entry back to hot; `state` must be the entry's
    /// locked `Cold(blob)`.
    fn promote(
        &self,
        key: &L::Key,
        entry: &Slot<L::Record>,
        mut state: MutexGuard<'_, EntryState<L::Record>>,
        blob: CompressedBlob,
    ) -> Result<Arc<SharedRecords<L::Record>>> {
        match self.loader.decompress(&blob.bytes, &self.scratch) {
            Ok(set) => {
                let charged = self.charge_for(&set);
                let records = Arc::new(self.materialize(key.clone(), set));
                self.hot_bytes.fetch_add(charged, Ordering::SeqCst);
                *state = EntryState::Hot {
                    records: records.clone(),
                    charged,
                };
                drop(state);
                self.counters.record_hit();
                self.counters.record_promotion();
                debug!("{}: promoted {}", self.name(), key.flat());
                self.enforce_budget();
                Ok(records)
            }
            Err(error) => {
                *state = EntryState::Invalidated;
                drop(state);
                self.counters.record_error();
                warn!("{}: dropping {}: {}", self.name(), key.flat(), error);
                self.entries
                    .remove_if(key, |_, current| Arc::ptr_eq(current, entry));
                self.forget(key);
                Err(error)
            }
        }
    }

    // == Get If Resident ==
    /// Hot or cold records for `key`, without ever loading. Cold entries are
    /// promoted like on [`get`](Self::get).
    pub fn get_if_resident(&self, key: &L::Key) -> Result<Option<Arc<SharedRecords<L::Record>>>> {
        let Some(entry) = self.slot(key) else {
            return Ok(None);
        };
        entry.touch(self.clock.tick());
        let state = entry.lock();
        let blob = match &*state {
            EntryState::Hot { records, .. } => {
                self.counters.record_hit();
                return Ok(Some(records.clone()));
            }
            EntryState::Cold(blob) => blob.clone(),
            _ => return Ok(None),
        };
        self.promote(key, &entry, state, blob).map(Some)
    }

    // == Get Compressed ==
    /// Compressed form of a resident entry. A hot entry is compressed on
    /// demand and stays hot.
    pub fn get_compressed(&self, key: &L::Key) -> Result<Option<(Arc<[u8]>, CompressionStatus)>> {
        let Some(entry) = self.slot(key) else {
            return Ok(None);
        };
        let records = {
            let state = entry.lock();
            match &*state {
                EntryState::Cold(blob) => {
                    return Ok(Some((blob.bytes.clone(), CompressionStatus::AlreadyCompressed)))
                }
                EntryState::Hot { records, .. } => records.clone(),
                _ => return Ok(None),
            }
        };

        match self.loader.compress(&records) {
            Ok(bytes) => {
                let blob = CompressedBlob::new(bytes, records.memory_estimate(), records.len());
                self.persist_if_current(key, &entry, &records, &blob);
                Ok(Some((blob.bytes, CompressionStatus::FreshlyCompressed)))
            }
            Err(error) => {
                self.counters.record_error();
                warn!("{}: compressing {} failed: {}", self.name(), key.flat(), error);
                Err(error)
            }
        }
    }

    fn slot(&self, key: &L::Key) -> Option<Slot<L::Record>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    // == Invalidate ==
    /// Invalidates `key`; the next lookup behaves as a fresh miss. Returns
    /// false when nothing live was cached for it.
    pub fn invalidate(&self, key: &L::Key) -> bool {
        let Some(entry) = self.slot(key) else {
            return false;
        };
        let invalidated = self.invalidate_slot(key, &entry);
        if invalidated {
            debug!("{}: invalidated {}", self.name(), key.flat());
        }
        invalidated
    }

    /// Invalidates every entry whose key matches the notification's columns.
    pub fn invalidate_matching(&self, object_key: &ObjectKey) -> usize {
        let matching: Vec<(L::Key, Slot<L::Record>)> = self
            .entries
            .iter()
            .filter(|item| item.key().matches(object_key))
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();

        let count = matching
            .iter()
            .filter(|(key, entry)| self.invalidate_slot(key, entry))
            .count();
        if count > 0 {
            info!("{}: invalidated {} entries for {}", self.name(), count, object_key);
        }
        count
    }

    fn invalidate_slot(&self, key: &L::Key, entry: &Slot<L::Record>) -> bool {
        let invalidated = match self.retire(entry) {
            Retired::Discarded => {
                self.entries
                    .remove_if(key, |_, current| Arc::ptr_eq(current, entry));
                true
            }
            Retired::Tombstoned => true,
            Retired::AlreadyInvalid => false,
        };
        if invalidated {
            self.counters.record_invalidation();
            self.forget(key);
        }
        invalidated
    }

    /// Turns an entry into a tombstone, or flags its in-flight load.
    fn retire(&self, entry: &CacheEntry<L::Record>) -> Retired {
        let previous = {
            let mut state = entry.lock();
            match &*state {
                EntryState::Loading => {
                    entry.discard();
                    return Retired::Discarded;
                }
                EntryState::Invalidated | EntryState::Failed(_) => return Retired::AlreadyInvalid,
                EntryState::Hot { .. } | EntryState::Cold(_) => {}
            }
            let previous = std::mem::replace(&mut *state, EntryState::Invalidated);
            if let EntryState::Hot { charged, .. } = &previous {
                self.hot_bytes.fetch_sub(*charged, Ordering::SeqCst);
            }
            previous
        };
        // may run Loader::destroy
        drop(previous);
        Retired::Tombstoned
    }

    fn evict(&self, key: &L::Key, entry: &Slot<L::Record>) -> bool {
        self.retire(entry);
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    // == Put ==
    /// Inserts a set without calling the loader. An existing live entry is
    /// only replaced when `overwrite` is set; a rejected set is handed to
    /// `Loader::destroy`.
    pub fn put(&self, key: L::Key, set: RecordSet<L::Record>, overwrite: bool) -> Result<()> {
        if !overwrite {
            if let Some(existing) = self.slot(&key) {
                if !existing.is_replaceable() {
                    warn!("{}: rejected put of {}, already present", self.name(), key.flat());
                    let error = CacheError::AlreadyPresent(key.flat());
                    self.loader.destroy(&key, set);
                    return Err(error);
                }
            }
        }

        let charged = self.charge_for(&set);
        let count = set.len();
        let records = Arc::new(self.materialize(key.clone(), set));
        self.hot_bytes.fetch_add(charged, Ordering::SeqCst);
        let fresh = Arc::new(CacheEntry::hot(records, charged, self.clock.tick()));

        let outcome = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) if overwrite || occupied.get().is_replaceable() => {
                Ok(Some(occupied.insert(fresh)))
            }
            Entry::Occupied(_) => Err(fresh),
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(None)
            }
        };

        match outcome {
            Ok(replaced) => {
                if let Some(old) = replaced {
                    self.retire(&old);
                }
                self.forget(&key);
                debug!("{}: put {} ({} records)", self.name(), key.flat(), count);
                self.after_insert();
                Ok(())
            }
            Err(fresh) => {
                // lost a race with a concurrent load
                self.hot_bytes.fetch_sub(charged, Ordering::SeqCst);
                drop(fresh);
                warn!("{}: rejected put of {}, already present", self.name(), key.flat());
                Err(CacheError::AlreadyPresent(key.flat()))
            }
        }
    }

    // == Warm Up ==
    /// Bulk-populates the cache from [`Loader::load`].
    pub fn warm_up(&self) -> Result<usize> {
        let sets = self
            .loader
            .load()
            .map_err(|e| e.into_cache_error(self.name()))?;

        let mut inserted = 0;
        for (key, set) in sets {
            match self.put(key, set, false) {
                Ok(()) => inserted += 1,
                Err(CacheError::AlreadyPresent(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!("{}: warmed up {} entries", self.name(), inserted);
        Ok(inserted)
    }

    // == Clear ==
    /// Evicts every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let count = self
            .snapshot()
            .iter()
            .filter(|(key, entry)| self.evict(key, entry))
            .count();
        info!("{}: cleared {} entries", self.name(), count);
        count
    }

    fn snapshot(&self) -> Vec<(L::Key, Slot<L::Record>)> {
        self.entries
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect()
    }

    // == Keys ==
    /// Snapshot of hot and cold keys.
    pub fn keys(&self) -> Vec<L::Key> {
        self.entries
            .iter()
            .filter(|item| {
                matches!(
                    item.value().status(),
                    EntryStatus::Hot | EntryStatus::Cold
                )
            })
            .map(|item| item.key().clone())
            .collect()
    }

    // == Sweep ==
    /// Removes tombstones. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let tombstones: Vec<(L::Key, Slot<L::Record>)> = self
            .entries
            .iter()
            .filter(|item| {
                item.value()
                    .try_lock()
                    .is_some_and(|state| state.status() == EntryStatus::Invalidated)
            })
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();

        tombstones
            .iter()
            .filter(|(key, entry)| {
                self.entries
                    .remove_if(key, |_, current| {
                        Arc::ptr_eq(current, entry) && current.is_replaceable()
                    })
                    .is_some()
            })
            .count()
    }

    // == Demotion ==
    /// Compresses least recently used hot entries until the hot bytes fit the
    /// budget. Returns the number demoted; returns 0 without waiting while
    /// another thread is demoting.
    pub fn enforce_budget(&self) -> usize {
        let cap = self.settings.hot_byte_capacity;
        if cap == 0 || self.hot_bytes() <= cap {
            return 0;
        }
        // another thread is already demoting; it or the next maintenance pass
        // brings the hot bytes back under the budget
        let Some(_demoting) = self.demotion.try_lock() else {
            return 0;
        };

        let mut lru = LruTracker::new();
        for item in self.entries.iter() {
            let entry = item.value();
            let Some(state) = entry.try_lock() else {
                continue;
            };
            if matches!(&*state, EntryState::Hot { charged, .. } if *charged > 0) {
                lru.record((item.key().clone(), entry.clone()), entry.last_access());
            }
        }

        let mut demoted = 0;
        while self.hot_bytes() > cap {
            let Some((key, entry)) = lru.evict_oldest() else {
                break;
            };
            if self.demote(&key, &entry) {
                demoted += 1;
            }
        }
        if demoted > 0 {
            debug!(
                "{}: demoted {} entries, {} hot bytes left",
                self.name(),
                demoted,
                self.hot_bytes()
            );
        }
        demoted
    }

    fn demote(&self, key: &L::Key, entry: &CacheEntry<L::Record>) -> bool {
        let mut state = entry.lock();
        let (records, charged) = match &*state {
            EntryState::Hot { records, charged } if *charged > 0 => (records.clone(), *charged),
            _ => return false,
        };

        let bytes = match self.loader.compress(&records) {
            Ok(bytes) => bytes,
            Err(error) => {
                drop(state);
                self.counters.record_error();
                warn!("{}: demoting {} failed: {}", self.name(), key.flat(), error);
                return false;
            }
        };

        let blob = CompressedBlob::new(bytes, records.memory_estimate(), records.len());
        let previous = std::mem::replace(&mut *state, EntryState::Cold(blob.clone()));
        self.hot_bytes.fetch_sub(charged, Ordering::SeqCst);
        // under the entry lock, so a racing invalidate removes it afterwards
        self.persist(key, &blob);
        drop(state);
        drop(previous);
        drop(records);
        self.counters.record_demotion();
        true
    }

    // == Blob Store ==
    /// Write-through of one blob. Store failures are logged and counted, never
    /// returned to the reader.
    fn persist(&self, key: &L::Key, blob: &CompressedBlob) -> bool {
        let Some(store) = &self.blob_store else {
            return false;
        };
        match encode_key(key).and_then(|encoded| store.write(self.name(), &encoded, blob)) {
            Ok(()) => true,
            Err(error) => {
                self.counters.record_error();
                warn!("{}: persisting {} failed: {}", self.name(), key.flat(), error);
                false
            }
        }
    }

    /// Persists `blob` only if `records` is still the entry's hot set.
    fn persist_if_current(
        &self,
        key: &L::Key,
        entry: &CacheEntry<L::Record>,
        records: &Arc<SharedRecords<L::Record>>,
        blob: &CompressedBlob,
    ) -> bool {
        if self.blob_store.is_none() {
            return false;
        }
        let state = entry.lock();
        match &*state {
            EntryState::Hot { records: current, .. } if Arc::ptr_eq(current, records) => {
                self.persist(key, blob)
            }
            _ => false,
        }
    }

    fn forget(&self, key: &L::Key) {
        let Some(store) = &self.blob_store else {
            return;
        };
        if let Err(error) = encode_key(key).and_then(|encoded| store.remove(self.name(), &encoded)) {
            self.counters.record_error();
            warn!("{}: forgetting {} failed: {}", self.name(), key.flat(), error);
        }
    }

    /// Installs every persisted blob whose key is not in the map as a cold
    /// entry, then applies the total capacity. Returns the number installed.
    pub fn warm_from_store(&self) -> Result<usize> {
        let Some(store) = &self.blob_store else {
            return Ok(0);
        };

        let mut installed = 0;
        for (encoded, blob) in store.entries(self.name())? {
            let key: L::Key = match decode_key(&encoded) {
                Ok(key) => key,
                Err(error) => {
                    self.counters.record_error();
                    warn!("{}: skipping persisted entry: {}", self.name(), error);
                    continue;
                }
            };
            if let Entry::Vacant(vacant) = self.entries.entry(key) {
                vacant.insert(Arc::new(CacheEntry::cold(blob, self.clock.tick())));
                installed += 1;
            }
        }
        self.evict_over_capacity();
        info!("{}: warmed {} entries from blob store", self.name(), installed);
        Ok(installed)
    }

    /// Writes the compressed form of every hot entry to the blob store. Cold
    /// entries were written when demoted. Returns the number written.
    pub fn flush_to_store(&self) -> usize {
        if self.blob_store.is_none() {
            return 0;
        }

        type HotEntry<K, R> = (K, Slot<R>, Arc<SharedRecords<R>>);
        let hot: Vec<HotEntry<L::Key, L::Record>> = self
            .snapshot()
            .into_iter()
            .filter_map(|(key, entry)| {
                let state = entry.lock();
                let records = match &*state {
                    EntryState::Hot { records, .. } => records.clone(),
                    _ => return None,
                };
                drop(state);
                Some((key, entry, records))
            })
            .collect();

        let mut written = 0;
        for (key, entry, records) in hot {
            match self.loader.compress(&records) {
                Ok(bytes) => {
                    let blob = CompressedBlob::new(bytes, records.memory_estimate(), records.len());
                    written += usize::from(self.persist_if_current(&key, &entry, &records, &blob));
                }
                Err(error) => {
                    self.counters.record_error();
                    warn!("{}: compressing {} failed: {}", self.name(), key.flat(), error);
                }
            }
        }
        info!("{}: flushed {} entries to blob store", self.name(), written);
        written
    }

    // == Capacity Eviction ==
    /// Evicts least recently used entries, tombstones first, while the map
    /// holds more than the total capacity.
    fn evict_over_capacity(&self) -> usize {
        let cap = self.settings.total_capacity;
        if cap == 0 || self.entries.len() <= cap {
            return 0;
        }

        let mut lru = LruTracker::new();
        for item in self.entries.iter() {
            let entry = item.value();
            let tick = match entry.try_lock().map(|state| state.status()) {
                Some(EntryStatus::Hot | EntryStatus::Cold) => entry.last_access(),
                Some(EntryStatus::Invalidated) => 0,
                Some(EntryStatus::Loading) | None => continue,
            };
            lru.record((item.key().clone(), entry.clone()), tick);
        }

        let mut evicted = 0;
        while self.entries.len() > cap {
            let Some((key, entry)) = lru.evict_oldest() else {
                break;
            };
            if self.evict(&key, &entry) {
                self.counters.record_eviction();
                evicted += 1;
                debug!("{}: evicted {}", self.name(), key.flat());
            }
        }
        evicted
    }

    fn after_insert(&self) {
        self.evict_over_capacity();
        self.enforce_budget();
    }

    // == Stats ==
    /// Compression statistics and counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            total_capacity: self.settings.total_capacity,
            threshold: self.settings.compression_threshold,
            hot_bytes: self.hot_bytes(),
            ..CacheStats::default()
        };

        let mut compressed_bytes = 0;
        let mut ratios = 0.0;
        for item in self.entries.iter() {
            stats.total_size += 1;
            let state = item.value().lock();
            match &*state {
                EntryState::Hot { records, .. } => {
                    stats.hot_count += 1;
                    stats.empty_count += usize::from(records.is_empty());
                    stats.memory_estimate += records.memory_estimate();
                }
                EntryState::Cold(blob) => {
                    stats.cold_count += 1;
                    stats.empty_count += usize::from(blob.record_count == 0);
                    stats.memory_estimate += blob.len();
                    compressed_bytes += blob.len();
                    ratios += blob.ratio();
                }
                _ => {}
            }
        }
        if stats.cold_count > 0 {
            stats.average_compressed_bytes = compressed_bytes / stats.cold_count;
            stats.average_ratio = ratios / stats.cold_count as f64;
        }

        self.counters.fill(&mut stats);
        stats
    }

    // == Dump ==
    /// One diagnostic per map entry, sorted by key.
    pub fn dump(&self) -> Vec<EntryDiagnostic> {
        let mut lines: Vec<EntryDiagnostic> = self
            .entries
            .iter()
            .map(|item| {
                let state = item.value().lock();
                let approx_bytes = match &*state {
                    EntryState::Hot { records, .. } => records.memory_estimate(),
                    EntryState::Cold(blob) => blob.len(),
                    _ => 0,
                };
                EntryDiagnostic {
                    key: item.key().flat(),
                    state: state.status(),
                    approx_bytes,
                    record_count: state.record_count(),
                }
            })
            .collect();
        lines.sort_by(|a, b| a.key.cmp(&b.key));
        lines
    }
}

// == Load Guard ==
/// Publishes a failure to waiters if the loader panics.
struct LoadGuard<'a, L: Loader> {
    cache: &'a Cache<L>,
    key: &'a L::Key,
    entry: &'a Slot<L::Record>,
    armed: bool,
}

impl<L: Loader> LoadGuard<'_, L> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<L: Loader> Drop for LoadGuard<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            let error = CacheError::Load {
                key: self.key.flat(),
                message: "loader panicked".to_string(),
                retryable: true,
            };
            self.cache.abandon_load(self.key, self.entry, error);
        }
    }
}
