//! Fare Cache - record cache server
//!
//! Serves the tax rule and carrier preference caches behind an admin HTTP
//! surface for stats, dumps and invalidation.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fare_cache::api::{create_router, AppState};
use fare_cache::tables::{
    carrier_preference_loader, sample_carrier_preferences, sample_tax_rules,
    tax_rules_historical_loader, tax_rules_loader,
};
use fare_cache::{
    spawn_maintenance_task, BlobStore, Cache, CacheRegistry, Config, FileBlobStore, Loader,
};

/// Main entry point for the fare cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build every cache with its loader and register it
/// 4. Install persisted blobs as cold entries, then eager-load the reference tables
/// 5. Start background maintenance task
/// 6. Start HTTP server on configured port
/// 7. On SIGINT/SIGTERM, stop serving, flush hot entries to the blob store
///    and release every cached set
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fare_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fare cache server");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: port={}, maintenance_interval={}s, hot_byte_capacity={}, total_capacity={}, threshold={}, class_overrides={}",
        config.server_port,
        config.maintenance_interval,
        config.defaults.hot_byte_capacity,
        config.defaults.total_capacity,
        config.defaults.compression_threshold,
        config.classes.len()
    );

    let registry = Arc::new(build_registry(&config, Utc::now().naive_utc())?);
    info!("{} caches ready", registry.len());

    let maintenance_handle = spawn_maintenance_task(registry.clone(), config.maintenance_interval);
    info!("Background maintenance task started");

    let app = create_router(AppState::new(registry.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(maintenance_handle))
        .await?;

    let released = tokio::task::spawn_blocking(move || {
        registry.flush_all();
        registry.clear_all()
    })
    .await?;
    info!("Server shutdown complete, released {} entries", released);
    Ok(())
}

/// Constructs and registers every cache. Persisted blobs are installed
/// first, then the reference tables are warmed up.
fn build_registry(config: &Config, reference: NaiveDateTime) -> anyhow::Result<CacheRegistry> {
    let store: Option<Arc<dyn BlobStore>> = match &config.blob_store_dir {
        Some(dir) => {
            let store = FileBlobStore::open(dir.clone())?;
            info!("Blob store at {}", store.root().display());
            Some(Arc::new(store))
        }
        None => None,
    };

    let registry = CacheRegistry::new();

    let taxes = Arc::new(tax_rules_loader(sample_tax_rules(reference)));
    let settings = config.settings_for(taxes.cache_class());
    registry.register(Arc::new(attach(Cache::new(taxes, settings), &store)))?;

    // historical lookups bucket their dates through HistoricalCache; the
    // registry only needs the underlying cache for admin operations
    let historical = Arc::new(tax_rules_historical_loader(sample_tax_rules(reference)));
    let settings = config.settings_for(historical.cache_class());
    registry.register(Arc::new(attach(Cache::new(historical, settings), &store)))?;

    let carriers = Arc::new(carrier_preference_loader(sample_carrier_preferences(reference)));
    let settings = config.settings_for(carriers.cache_class());
    let carriers = Arc::new(attach(Cache::new(carriers, settings), &store));
    registry.register(carriers.clone())?;

    let installed = registry.warm_all_from_store()?;
    info!("Installed {} persisted entries", installed);
    carriers.warm_up()?;

    Ok(registry)
}

fn attach<L: Loader>(cache: Cache<L>, store: &Option<Arc<dyn BlobStore>>) -> Cache<L> {
    match store {
        Some(store) => cache.with_blob_store(store.clone()),
        None => cache,
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the maintenance task and allows graceful shutdown.
async fn shutdown_signal(maintenance_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    maintenance_handle.abort();
    info!("Maintenance task aborted");
}
