//! API Routes
//!
//! Configures the Axum router with all cache admin endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, fetch_handler, health_handler, invalidate_handler, mutation_handler,
    stats_handler, warm_installed_handler, warmup_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /cache/stats` - Cache statistics
/// - `DELETE /cache/clear` - Drop every entry
/// - `GET /cache/entries/:kind/*identifier` - Read-through lookup
/// - `POST /cache/invalidate` - Entity or global invalidation
/// - `POST /cache/mutations` - Invalidate after install/uninstall/update
/// - `POST /cache/warmup` - Warm a list of packages
/// - `POST /cache/warmup/installed` - Warm installed packages
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/cache/clear", delete(clear_handler))
        .route("/cache/entries/:kind/*identifier", get(fetch_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .route("/cache/mutations", post(mutation_handler))
        .route("/cache/warmup", post(warmup_handler))
        .route("/cache/warmup/installed", post(warm_installed_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
