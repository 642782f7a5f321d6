//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::{CacheStats, EntryDiagnostic};

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Number of registered caches
    pub caches: usize,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(caches: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            caches,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One registered cache in GET /caches
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub name: String,
    pub cache_class: String,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheListResponse {
    pub caches: Vec<CacheInfo>,
}

/// Response body for GET /stats/:cache
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(stats: CacheStats) -> Self {
        let hit_rate = stats.hit_rate();
        Self { stats, hit_rate }
    }
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct AllStatsResponse {
    pub caches: BTreeMap<String, StatsResponse>,
    pub by_class: BTreeMap<String, StatsResponse>,
}

impl AllStatsResponse {
    pub fn new(
        caches: BTreeMap<String, CacheStats>,
        by_class: BTreeMap<String, CacheStats>,
    ) -> Self {
        Self {
            caches: caches.into_iter().map(|(k, v)| (k, StatsResponse::new(v))).collect(),
            by_class: by_class.into_iter().map(|(k, v)| (k, StatsResponse::new(v))).collect(),
        }
    }
}

/// Response body for GET /dump/:cache
#[derive(Debug, Clone, Serialize)]
pub struct DumpResponse {
    pub cache: String,
    pub entries: Vec<EntryDiagnostic>,
    /// The same entries rendered one line each
    pub lines: Vec<String>,
}

impl DumpResponse {
    pub fn new(cache: impl Into<String>, entries: Vec<EntryDiagnostic>) -> Self {
        let lines = entries.iter().map(ToString::to_string).collect();
        Self {
            cache: cache.into(),
            entries,
            lines,
        }
    }
}

/// Response body for POST /invalidate/:cache
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub cache: String,
    pub invalidated: usize,
}

/// Response body for DELETE /clear/:cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub cache: String,
    pub cleared: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryStatus;

    #[test]
    fn test_stats_response_flattens_stats() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            hot_count: 3,
            ..CacheStats::default()
        };
        let json = serde_json::to_value(StatsResponse::new(stats)).unwrap();
        assert_eq!(json["hot_count"], 3);
        assert!((json["hit_rate"].as_f64().unwrap() - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_stats_response_zero_requests() {
        let resp = StatsResponse::new(CacheStats::default());
        assert_eq!(resp.hit_rate, 0.0);
    }

    #[test]
    fn test_dump_response_lines() {
        let resp = DumpResponse::new(
            "TaxRulesRecord",
            vec![EntryDiagnostic {
                key: "US|D".to_string(),
                state: EntryStatus::Cold,
                approx_bytes: 120,
                record_count: 4,
            }],
        );
        assert_eq!(resp.lines, vec!["US|D COLD 120B 4 records".to_string()]);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""state":"cold""#));
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy(2);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
