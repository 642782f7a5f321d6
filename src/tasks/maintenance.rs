//! Cache Maintenance Task
//!
//! Background task that periodically sweeps tombstones and enforces the
//! hot-byte budget of every registered cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::CacheRegistry;

/// Spawns a background task that runs [`CacheRegistry::maintain`] every
/// `interval_secs` seconds.
///
/// Cache maintenance takes entry locks and may run `Loader::destroy`, so each
/// pass runs on the blocking pool.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_maintenance_task(registry: Arc<CacheRegistry>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting cache maintenance task with interval of {} seconds",
            interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let registry = registry.clone();
            match tokio::task::spawn_blocking(move || registry.maintain()).await {
                Ok(report) if report.swept > 0 || report.demoted > 0 => {
                    info!(
                        "Maintenance: swept {} tombstones, demoted {} entries",
                        report.swept, report.demoted
                    );
                }
                Ok(_) => debug!("Maintenance: nothing to do"),
                Err(e) => warn!("Maintenance pass failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::CacheSettings;
    use crate::registry::ManagedCache;
    use crate::tables::{sample_tax_rules, tax_rules_loader, TaxRulesKey};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_maintenance_task_sweeps_tombstones() {
        let reference = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let cache = Arc::new(Cache::new(
            Arc::new(tax_rules_loader(sample_tax_rules(reference))),
            CacheSettings::unbounded(),
        ));
        let registry = Arc::new(CacheRegistry::new());
        registry.register(cache.clone()).unwrap();

        cache.get(&TaxRulesKey::new("US", 'D'), reference).unwrap();
        cache.get(&TaxRulesKey::new("CA", 'D'), reference).unwrap();
        cache.invalidate(&TaxRulesKey::new("US", 'D'));
        assert_eq!(cache.len(), 2);

        let handle = spawn_maintenance_task(registry, 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(ManagedCache::resident_keys(cache.as_ref()), vec!["CA|D".to_string()]);

        handle.abort();
    }

    #[tokio::test]
    async fn test_maintenance_task_can_be_aborted() {
        let handle = spawn_maintenance_task(Arc::new(CacheRegistry::new()), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
