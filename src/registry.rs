//! Registry Module
//!
//! Named handles to every cache of the process, built at startup and passed
//! explicitly to whoever needs to reach caches by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::cache::{Cache, CacheStats, EntryDiagnostic};
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, ObjectKey};
use crate::loader::Loader;

// == Managed Cache ==
/// Type-erased operations over one cache.
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;
    fn cache_class(&self) -> &str;
    fn stats(&self) -> CacheStats;
    fn dump(&self) -> Vec<EntryDiagnostic>;
    /// Flattened resident keys
    fn resident_keys(&self) -> Vec<String>;
    fn invalidate_object(&self, object_key: &ObjectKey) -> usize;
    fn clear(&self) -> usize;
    fn sweep(&self) -> usize;
    fn enforce_budget(&self) -> usize;
    fn warm_from_store(&self) -> Result<usize>;
    fn flush_to_store(&self) -> usize;
}

impl<L: Loader> ManagedCache for Cache<L> {
    fn name(&self) -> &str {
        Cache::name(self)
    }

    fn cache_class(&self) -> &str {
        Cache::cache_class(self)
    }

    fn stats(&self) -> CacheStats {
        Cache::stats(self)
    }

    fn dump(&self) -> Vec<EntryDiagnostic> {
        Cache::dump(self)
    }

    fn resident_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Cache::keys(self).iter().map(CacheKey::flat).collect();
        keys.sort();
        keys
    }

    fn invalidate_object(&self, object_key: &ObjectKey) -> usize {
        self.invalidate_matching(object_key)
    }

    fn clear(&self) -> usize {
        Cache::clear(self)
    }

    fn sweep(&self) -> usize {
        Cache::sweep(self)
    }

    fn enforce_budget(&self) -> usize {
        Cache::enforce_budget(self)
    }

    fn warm_from_store(&self) -> Result<usize> {
        Cache::warm_from_store(self)
    }

    fn flush_to_store(&self) -> usize {
        Cache::flush_to_store(self)
    }
}

// == Maintenance Report ==
/// Totals of one maintenance pass over every cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub swept: usize,
    pub demoted: usize,
}

// == Cache Registry ==
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<BTreeMap<String, Arc<dyn ManagedCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cache under its own name; names are unique.
    pub fn register(&self, cache: Arc<dyn ManagedCache>) -> Result<()> {
        let name = cache.name().to_string();
        let mut caches = self.caches.write();
        if caches.contains_key(&name) {
            return Err(CacheError::AlreadyPresent(format!("cache {}", name)));
        }
        info!("Registered cache {} ({})", name, cache.cache_class());
        caches.insert(name, cache);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ManagedCache>> {
        self.caches
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    fn handles(&self) -> Vec<Arc<dyn ManagedCache>> {
        self.caches.read().values().cloned().collect()
    }

    // == Stats ==
    pub fn stats_all(&self) -> BTreeMap<String, CacheStats> {
        self.handles()
            .iter()
            .map(|cache| (cache.name().to_string(), cache.stats()))
            .collect()
    }

    /// Stats merged per cache class.
    pub fn stats_by_class(&self) -> BTreeMap<String, CacheStats> {
        let mut classes: BTreeMap<String, CacheStats> = BTreeMap::new();
        for cache in self.handles() {
            classes
                .entry(cache.cache_class().to_string())
                .or_default()
                .merge(&cache.stats());
        }
        classes
    }

    // == Bulk Operations ==
    /// Routes a change notification to the cache named by its entity.
    pub fn invalidate(&self, object_key: &ObjectKey) -> Result<usize> {
        Ok(self.lookup(&object_key.entity)?.invalidate_object(object_key))
    }

    pub fn clear_all(&self) -> usize {
        let cleared = self.handles().iter().map(|cache| cache.clear()).sum();
        info!("Cleared {} entries across {} caches", cleared, self.len());
        cleared
    }

    /// Installs persisted blobs as cold entries in every cache with a store.
    pub fn warm_all_from_store(&self) -> Result<usize> {
        let mut installed = 0;
        for cache in self.handles() {
            installed += cache.warm_from_store()?;
        }
        Ok(installed)
    }

    /// Persists every hot entry of every cache with a store.
    pub fn flush_all(&self) -> usize {
        let written = self.handles().iter().map(|cache| cache.flush_to_store()).sum();
        info!("Flushed {} entries to blob stores", written);
        written
    }

    /// Sweeps tombstones and enforces hot budgets everywhere.
    pub fn maintain(&self) -> MaintenanceReport {
        self.handles()
            .iter()
            .fold(MaintenanceReport::default(), |report, cache| MaintenanceReport {
                swept: report.swept + cache.sweep(),
                demoted: report.demoted + cache.enforce_budget(),
            })
    }
}
