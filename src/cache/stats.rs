//! Cache Statistics Module
//!
//! Lock-free operation counters and the compression statistics snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Stats Recorder ==
/// Counters updated on the lookup path without taking any lock.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_hit, hits);
    counter!(record_miss, misses);
    counter!(record_load, loads);
    counter!(record_load_failure, load_failures);
    counter!(record_promotion, promotions);
    counter!(record_demotion, demotions);
    counter!(record_eviction, evictions);
    counter!(record_invalidation, invalidations);
    // compression and decompression failures
    counter!(record_error, errors);

    /// Copies the counters into `stats`.
    pub fn fill(&self, stats: &mut CacheStats) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.loads = self.loads.load(Ordering::Relaxed);
        stats.load_failures = self.load_failures.load(Ordering::Relaxed);
        stats.promotions = self.promotions.load(Ordering::Relaxed);
        stats.demotions = self.demotions.load(Ordering::Relaxed);
        stats.evictions = self.evictions.load(Ordering::Relaxed);
        stats.invalidations = self.invalidations.load(Ordering::Relaxed);
        stats.error_count = self.errors.load(Ordering::Relaxed);
    }
}

// == Cache Stats ==
/// Point-in-time compression statistics and operation counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries in the map, tombstones included
    pub total_size: usize,
    /// Configured entry limit, 0 = unbounded
    pub total_capacity: usize,
    pub hot_count: usize,
    pub cold_count: usize,
    /// Resident entries whose record set is empty
    pub empty_count: usize,
    /// Bytes of hot sets plus bytes of cold blobs
    pub memory_estimate: usize,
    /// Bytes currently charged against the hot budget
    pub hot_bytes: usize,
    pub average_compressed_bytes: usize,
    pub average_ratio: f64,
    pub threshold: usize,
    pub error_count: u64,

    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Merge ==
    /// Folds another cache's stats into this one, weighting averages by cold count.
    pub fn merge(&mut self, other: &CacheStats) {
        let cold = self.cold_count + other.cold_count;
        if cold > 0 {
            self.average_compressed_bytes = (self.average_compressed_bytes * self.cold_count
                + other.average_compressed_bytes * other.cold_count)
                / cold;
            self.average_ratio = (self.average_ratio * self.cold_count as f64
                + other.average_ratio * other.cold_count as f64)
                / cold as f64;
        }

        self.total_size += other.total_size;
        self.total_capacity += other.total_capacity;
        self.hot_count += other.hot_count;
        self.cold_count = cold;
        self.empty_count += other.empty_count;
        self.memory_estimate += other.memory_estimate;
        self.hot_bytes += other.hot_bytes;
        self.threshold = self.threshold.max(other.threshold);
        self.error_count += other.error_count;
        self.hits += other.hits;
        self.misses += other.misses;
        self.loads += other.loads;
        self.load_failures += other.load_failures;
        self.promotions += other.promotions;
        self.demotions += other.demotions;
        self.evictions += other.evictions;
        self.invalidations += other.invalidations;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size={}/{} hot={} cold={} empty={} mem={}B avgBlob={}B ratio={:.3} threshold={} errors={} hitRate={:.3}",
            self.total_size,
            self.total_capacity,
            self.hot_count,
            self.cold_count,
            self.empty_count,
            self.memory_estimate,
            self.average_compressed_bytes,
            self.average_ratio,
            self.threshold,
            self.error_count,
            self.hit_rate()
        )
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_fill() {
        let recorder = StatsRecorder::new();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_miss();
        recorder.record_error();

        let mut stats = CacheStats::default();
        recorder.fill(&mut stats);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_merge_weights_averages() {
        let mut a = CacheStats {
            cold_count: 1,
            average_compressed_bytes: 100,
            average_ratio: 0.5,
            hits: 1,
            ..Default::default()
        };
        let b = CacheStats {
            cold_count: 3,
            average_compressed_bytes: 200,
            average_ratio: 0.25,
            hits: 2,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.cold_count, 4);
        assert_eq!(a.average_compressed_bytes, 175);
        assert!((a.average_ratio - 0.3125).abs() < 1e-9);
        assert_eq!(a.hits, 3);
    }

    #[test]
    fn test_merge_with_no_cold_entries_keeps_zero_averages() {
        let mut a = CacheStats::default();
        a.merge(&CacheStats::default());
        assert_eq!(a.average_ratio, 0.0);
        assert_eq!(a.average_compressed_bytes, 0);
    }
}
