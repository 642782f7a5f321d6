//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{CacheError, Result};
use crate::models::{
    AllStatsResponse, CacheInfo, CacheListResponse, ClearResponse, DumpResponse, HealthResponse,
    InvalidateRequest, InvalidateResponse, StatsResponse,
};
use crate::registry::CacheRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CacheRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<CacheRegistry>) -> Self {
        Self { registry }
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.registry.len()))
}

/// Handler for GET /caches
pub async fn list_handler(State(state): State<AppState>) -> Result<Json<CacheListResponse>> {
    let caches = state
        .registry
        .names()
        .iter()
        .map(|name| {
            let cache = state.registry.lookup(name)?;
            Ok(CacheInfo {
                name: name.clone(),
                cache_class: cache.cache_class().to_string(),
                entries: cache.stats().total_size,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(CacheListResponse { caches }))
}

/// Handler for GET /stats
///
/// Per-cache stats plus the same stats merged per cache class.
pub async fn stats_handler(State(state): State<AppState>) -> Json<AllStatsResponse> {
    Json(AllStatsResponse::new(
        state.registry.stats_all(),
        state.registry.stats_by_class(),
    ))
}

/// Handler for GET /stats/:cache
pub async fn cache_stats_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
) -> Result<Json<StatsResponse>> {
    let cache = state.registry.lookup(&cache)?;
    Ok(Json(StatsResponse::new(cache.stats())))
}

/// Handler for GET /dump/:cache
pub async fn dump_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
) -> Result<Json<DumpResponse>> {
    let handle = state.registry.lookup(&cache)?;
    Ok(Json(DumpResponse::new(cache, handle.dump())))
}

/// Handler for POST /invalidate/:cache
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let object_key = req.into_object_key(cache.clone());
    let invalidated = state.registry.invalidate(&object_key)?;

    Ok(Json(InvalidateResponse { cache, invalidated }))
}

/// Handler for DELETE /clear/:cache
pub async fn clear_handler(
    State(state): State<AppState>,
    Path(cache): Path<String>,
) -> Result<Json<ClearResponse>> {
    let cleared = state.registry.lookup(&cache)?.clear();

    Ok(Json(ClearResponse { cache, cleared }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::CacheSettings;
    use crate::tables::{sample_tax_rules, tax_rules_loader, TaxRulesKey, TAX_RULES};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn state() -> AppState {
        let reference = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let cache = Arc::new(Cache::new(
            Arc::new(tax_rules_loader(sample_tax_rules(reference))),
            CacheSettings::unbounded(),
        ));
        cache.get(&TaxRulesKey::new("US", 'D'), reference).unwrap();
        cache.get(&TaxRulesKey::new("CA", 'D'), reference).unwrap();

        let registry = CacheRegistry::new();
        registry.register(cache).unwrap();
        AppState::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler(State(state())).await;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.caches, 1);
    }

    #[tokio::test]
    async fn test_list_handler() {
        let response = list_handler(State(state())).await.unwrap();
        assert_eq!(response.caches.len(), 1);
        assert_eq!(response.caches[0].name, TAX_RULES);
        assert_eq!(response.caches[0].entries, 2);
    }

    #[tokio::test]
    async fn test_cache_stats_unknown_cache() {
        let result = cache_stats_handler(State(state()), Path("Nope".to_string())).await;
        assert!(matches!(result, Err(CacheError::UnknownCache(_))));
    }

    #[tokio::test]
    async fn test_invalidate_handler() {
        let state = state();
        let mut fields = BTreeMap::new();
        fields.insert("NATION".to_string(), "US".to_string());

        let response = invalidate_handler(
            State(state.clone()),
            Path(TAX_RULES.to_string()),
            Json(InvalidateRequest { fields }),
        )
        .await
        .unwrap();
        assert_eq!(response.invalidated, 1);

        let dump = dump_handler(State(state), Path(TAX_RULES.to_string()))
            .await
            .unwrap();
        assert_eq!(dump.lines.len(), 2);
        assert!(dump.lines[1].starts_with("US|D INVALIDATED"));
    }

    #[tokio::test]
    async fn test_invalidate_invalid_request() {
        let result = invalidate_handler(
            State(state()),
            Path(TAX_RULES.to_string()),
            Json(InvalidateRequest {
                fields: BTreeMap::new(),
            }),
        )
        .await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_clear_handler() {
        let state = state();
        let response = clear_handler(State(state.clone()), Path(TAX_RULES.to_string()))
            .await
            .unwrap();
        assert_eq!(response.cleared, 2);

        let stats = cache_stats_handler(State(state), Path(TAX_RULES.to_string()))
            .await
            .unwrap();
        assert_eq!(stats.stats.total_size, 0);
    }
}
