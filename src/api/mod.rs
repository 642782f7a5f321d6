//! API Module
//!
//! HTTP handlers and routing for the cache admin surface.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /caches` - Registered caches
//! - `GET /stats`, `GET /stats/:cache` - Compression stats and counters
//! - `GET /dump/:cache` - Per-entry diagnostics
//! - `POST /invalidate/:cache` - Invalidate entries matching an object key
//! - `DELETE /clear/:cache` - Evict every entry of a cache

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
