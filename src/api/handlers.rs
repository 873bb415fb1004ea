//! API Handlers
//!
//! HTTP request handlers for the cache admin endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::fetcher::{CommandFetcher, DataFetcher, TimeoutFetcher};
use crate::gateway::CacheGateway;
use crate::models::{
    FetchResponse, HealthResponse, InvalidateResponse, StatsResponse, WarmInstalledBody,
    WarmupBody, WarmupStartedResponse,
};
use crate::namespace::{CacheKey, EntityKind, Invalidation, Mutation};
use crate::prepopulate::{PrePopulator, WarmupRequest};

/// Application state shared across all handlers.
///
/// Owns the composition root: one store, one gateway over it, one
/// pre-populator driving the gateway.
#[derive(Clone, Debug)]
pub struct AppState {
    pub gateway: Arc<CacheGateway>,
    pub populator: PrePopulator,
    /// Concurrency used when a request does not name one
    pub warmup_concurrency: usize,
}

impl AppState {
    pub fn new(gateway: Arc<CacheGateway>, populator: PrePopulator, warmup_concurrency: usize) -> Self {
        Self {
            gateway,
            populator,
            warmup_concurrency,
        }
    }

    /// Wires the store, gateway and pre-populator around a command-line
    /// fetcher bounded by the configured timeouts.
    pub fn from_config(config: &Config) -> Self {
        let fetcher = Arc::new(TimeoutFetcher::new(
            CommandFetcher::new(config.package_bin.clone(), config.docs_bin.clone()),
            config.fetch_timeouts,
        ));
        let store = Arc::new(CacheStore::new(config.max_entries));
        let gateway = Arc::new(
            CacheGateway::new(store, fetcher.clone() as Arc<dyn DataFetcher>, config.ttl)
                .with_negative_store(CacheStore::new(config.negative_max_entries)),
        );
        let populator = PrePopulator::new(Arc::clone(&gateway))
            .with_inventory(fetcher)
            .with_doc_fanout(config.warmup_doc_fanout);

        Self::new(gateway, populator, config.warmup_concurrency)
    }
}

/// Handler for GET /cache/entries/:kind/*identifier
///
/// Read-through lookup of one fact. The identifier may contain slashes
/// (`homebrew/core/node`).
pub async fn fetch_handler(
    State(state): State<AppState>,
    Path((kind, identifier)): Path<(String, String)>,
) -> Result<Json<FetchResponse>> {
    let kind: EntityKind = kind.parse()?;
    let value = state.gateway.fetch(kind, &identifier).await?;

    let key = CacheKey::new(kind, &identifier);
    let ttl = state.gateway.store().ttl_remaining(key.as_str());
    Ok(Json(FetchResponse::new(key, value).with_ttl_remaining(ttl)))
}

/// Handler for POST /cache/invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(invalidation): Json<Invalidation>,
) -> Result<Json<InvalidateResponse>> {
    if matches!(&invalidation, Invalidation::Entity { identifier } if identifier.is_empty()) {
        return Err(CacheError::InvalidRequest("Identifier cannot be empty".to_string()));
    }

    let removed = state.gateway.invalidate(&invalidation);
    Ok(Json(InvalidateResponse::new("Invalidated", removed)))
}

/// Handler for POST /cache/mutations
///
/// Called after the package manager finished a mutating command.
pub async fn mutation_handler(
    State(state): State<AppState>,
    Json(mutation): Json<Mutation>,
) -> Json<InvalidateResponse> {
    info!(?mutation, "applying mutation");
    let removed = state.gateway.apply_mutation(&mutation);
    Json(InvalidateResponse::new("Mutation applied", removed))
}

/// Handler for DELETE /cache/clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<InvalidateResponse> {
    let removed = state.gateway.clear();
    Json(InvalidateResponse::new("Cache cleared successfully", removed))
}

/// Handler for POST /cache/warmup
///
/// Starts a batch in the background, or runs it to completion when `wait`
/// is set.
pub async fn warmup_handler(
    State(state): State<AppState>,
    Json(body): Json<WarmupBody>,
) -> Result<Response> {
    if let Some(error_msg) = body.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let count = body.identifiers.len();
    let request = WarmupRequest::new(body.identifiers)
        .with_concurrency_limit(body.concurrency_limit.unwrap_or(state.warmup_concurrency));

    if body.wait {
        let outcome = state.populator.run(request).await?;
        return Ok(Json(outcome).into_response());
    }

    // Detached: the handle is dropped, the batch keeps running
    state.populator.spawn(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WarmupStartedResponse::new(format!(
            "Cache pre-population started in background for {count} packages"
        ))),
    )
        .into_response())
}

/// Handler for POST /cache/warmup/installed
pub async fn warm_installed_handler(
    State(state): State<AppState>,
    Json(body): Json<WarmInstalledBody>,
) -> Result<Response> {
    let concurrency = body.concurrency_limit.unwrap_or(state.warmup_concurrency);

    if body.wait {
        let outcome = state.populator.warm_installed(body.limit, concurrency).await?;
        return Ok(Json(outcome).into_response());
    }

    state.populator.spawn_installed(body.limit, concurrency)?;
    let message = match body.limit {
        Some(limit) => format!("Limited cache pre-population started in background with limit: {limit}"),
        None => "Cache pre-population started in background".to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(WarmupStartedResponse::new(message))).into_response())
}

/// Handler for GET /cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.gateway.stats();
    Json(StatsResponse::new(
        &stats,
        state.gateway.negative_stats().total_entries,
    ))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
