//! Configuration Module
//!
//! Loads server settings and per-cache-class capacity settings from
//! environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::error::{CacheError, Result};

const CLASS_PREFIX: &str = "CACHE_";
const HOT_BYTES_SUFFIX: &str = "_HOT_BYTES";
const TOTAL_CAPACITY_SUFFIX: &str = "_TOTAL_CAPACITY";
const THRESHOLD_SUFFIX: &str = "_THRESHOLD";

// == Cache Settings ==
/// Capacity and compression settings for one cache class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Byte budget for decompressed entries before demotion starts, 0 = unbounded
    pub hot_byte_capacity: usize,
    /// Maximum number of entries, 0 = unbounded
    pub total_capacity: usize,
    /// Record sets with fewer records than this stay hot and are not charged
    pub compression_threshold: usize,
}

impl CacheSettings {
    /// Validates raw signed values; negatives are a misconfiguration.
    pub fn new(hot_byte_capacity: i64, total_capacity: i64, compression_threshold: i64) -> Result<Self> {
        Ok(Self {
            hot_byte_capacity: non_negative("hot byte capacity", hot_byte_capacity)?,
            total_capacity: non_negative("total capacity", total_capacity)?,
            compression_threshold: non_negative("compression threshold", compression_threshold)?,
        })
    }

    /// No demotion and no eviction.
    pub fn unbounded() -> Self {
        Self {
            hot_byte_capacity: 0,
            total_capacity: 0,
            compression_threshold: 1,
        }
    }

    pub fn with_hot_byte_capacity(mut self, bytes: usize) -> Self {
        self.hot_byte_capacity = bytes;
        self
    }

    pub fn with_total_capacity(mut self, entries: usize) -> Self {
        self.total_capacity = entries;
        self
    }

    pub fn with_compression_threshold(mut self, records: usize) -> Self {
        self.compression_threshold = records;
        self
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            hot_byte_capacity: 64 * 1024 * 1024,
            total_capacity: 0,
            compression_threshold: 1,
        }
    }
}

fn non_negative(what: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        CacheError::CapacityMisconfiguration(format!("{} must not be negative, got {}", what, value))
    })
}

// == Config ==
/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port of the admin surface
    pub server_port: u16,
    /// Background maintenance interval in seconds
    pub maintenance_interval: u64,
    /// Settings for cache classes without overrides
    pub defaults: CacheSettings,
    /// Per cache class overrides, keyed by upper-cased class name
    pub classes: HashMap<String, CacheSettings>,
    /// Directory of the persistent blob store; no persistence when unset
    pub blob_store_dir: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - admin HTTP port (default: 3000)
    /// - `MAINTENANCE_INTERVAL` - sweep/demotion interval in seconds (default: 5)
    /// - `HOT_BYTE_CAPACITY` - default hot byte budget (default: 64 MiB)
    /// - `TOTAL_CAPACITY` - default entry limit (default: 0, unbounded)
    /// - `COMPRESSION_THRESHOLD` - default threshold in records (default: 1)
    /// - `CACHE_<CLASS>_HOT_BYTES`, `CACHE_<CLASS>_TOTAL_CAPACITY`,
    ///   `CACHE_<CLASS>_THRESHOLD` - per class overrides
    /// - `BLOB_STORE_DIR` - persist compressed entries here and warm-start
    ///   from them (default: unset)
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    /// Same as [`from_env`](Self::from_env) over an explicit variable list.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let base = Config::default();

        let server_port = vars
            .get("SERVER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(base.server_port);
        let maintenance_interval = vars
            .get("MAINTENANCE_INTERVAL")
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(base.maintenance_interval);

        let defaults = settings_from(
            &vars,
            "HOT_BYTE_CAPACITY",
            "TOTAL_CAPACITY",
            "COMPRESSION_THRESHOLD",
            base.defaults,
        )?;

        let mut classes = HashMap::new();
        for name in vars.keys() {
            if let Some(class) = class_of(name) {
                if classes.contains_key(class) {
                    continue;
                }
                let settings = settings_from(
                    &vars,
                    &format!("{}{}{}", CLASS_PREFIX, class, HOT_BYTES_SUFFIX),
                    &format!("{}{}{}", CLASS_PREFIX, class, TOTAL_CAPACITY_SUFFIX),
                    &format!("{}{}{}", CLASS_PREFIX, class, THRESHOLD_SUFFIX),
                    defaults,
                )?;
                classes.insert(class.to_string(), settings);
            }
        }

        let blob_store_dir = vars
            .get("BLOB_STORE_DIR")
            .map(|dir| dir.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            server_port,
            maintenance_interval,
            defaults,
            classes,
            blob_store_dir,
        })
    }

    /// Settings for a cache class, falling back to the defaults.
    pub fn settings_for(&self, cache_class: &str) -> CacheSettings {
        self.classes
            .get(&cache_class.to_ascii_uppercase())
            .copied()
            .unwrap_or(self.defaults)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            maintenance_interval: 5,
            defaults: CacheSettings::default(),
            classes: HashMap::new(),
            blob_store_dir: None,
        }
    }
}

fn class_of(var: &str) -> Option<&str> {
    let rest = var.strip_prefix(CLASS_PREFIX)?;
    [HOT_BYTES_SUFFIX, TOTAL_CAPACITY_SUFFIX, THRESHOLD_SUFFIX]
        .iter()
        .find_map(|suffix| rest.strip_suffix(suffix))
        .filter(|class| !class.is_empty())
}

fn settings_from(
    vars: &HashMap<String, String>,
    hot_var: &str,
    total_var: &str,
    threshold_var: &str,
    fallback: CacheSettings,
) -> Result<CacheSettings> {
    CacheSettings::new(
        signed(vars, hot_var, fallback.hot_byte_capacity)?,
        signed(vars, total_var, fallback.total_capacity)?,
        signed(vars, threshold_var, fallback.compression_threshold)?,
    )
}

fn signed(vars: &HashMap<String, String>, name: &str, fallback: usize) -> Result<i64> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
            CacheError::CapacityMisconfiguration(format!("{} is not an integer: {:?}", name, raw))
        }),
        None => Ok(fallback as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.maintenance_interval, 5);
        assert_eq!(config.defaults.hot_byte_capacity, 64 * 1024 * 1024);
        assert_eq!(config.defaults.total_capacity, 0);
        assert_eq!(config.defaults.compression_threshold, 1);
    }

    #[test]
    fn test_config_from_empty_vars_uses_defaults() {
        let config = Config::from_vars(Vec::new()).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.defaults, CacheSettings::default());
        assert!(config.classes.is_empty());
    }

    #[test]
    fn test_class_override_inherits_unset_fields() {
        let config = Config::from_vars(vars(&[
            ("TOTAL_CAPACITY", "500"),
            ("CACHE_RULES_HOT_BYTES", "4096"),
        ]))
        .unwrap();

        let rules = config.settings_for("Rules");
        assert_eq!(rules.hot_byte_capacity, 4096);
        assert_eq!(rules.total_capacity, 500);

        let fares = config.settings_for("Fares");
        assert_eq!(fares, config.defaults);
    }

    #[test]
    fn test_negative_capacity_is_misconfiguration() {
        let result = Config::from_vars(vars(&[("HOT_BYTE_CAPACITY", "-1")]));
        assert!(matches!(result, Err(CacheError::CapacityMisconfiguration(_))));

        let result = Config::from_vars(vars(&[("CACHE_TAXES_TOTAL_CAPACITY", "-10")]));
        assert!(matches!(result, Err(CacheError::CapacityMisconfiguration(_))));
    }

    #[test]
    fn test_non_numeric_capacity_is_misconfiguration() {
        let result = Config::from_vars(vars(&[("COMPRESSION_THRESHOLD", "lots")]));
        assert!(matches!(result, Err(CacheError::CapacityMisconfiguration(_))));
    }

    #[test]
    fn test_blob_store_dir() {
        let config = Config::from_vars(vars(&[("BLOB_STORE_DIR", "/var/cache/fares")])).unwrap();
        assert_eq!(config.blob_store_dir, Some(PathBuf::from("/var/cache/fares")));

        let config = Config::from_vars(vars(&[("BLOB_STORE_DIR", "  ")])).unwrap();
        assert!(config.blob_store_dir.is_none());
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let config = Config::from_vars(vars(&[("SERVER_PORT", "not-a-port")])).unwrap();
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_settings_new_rejects_negative() {
        assert!(CacheSettings::new(0, -1, 0).is_err());
        assert_eq!(
            CacheSettings::new(10, 20, 3).unwrap(),
            CacheSettings::unbounded()
                .with_hot_byte_capacity(10)
                .with_total_capacity(20)
                .with_compression_threshold(3)
        );
    }
}
