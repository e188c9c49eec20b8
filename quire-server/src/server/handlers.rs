use crate::cache::{QueryCache, QueryCacheStats};
use crate::core::{Backend, QuireError};
use crate::server::rate_limit::RateLimiter;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<QueryCache>,
    pub limiter: RateLimiter,
}

// Request/Response types for REST API
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub value: serde_json::Value,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetResponse {
    pub success: bool,
    pub key: String,
    pub backend: Backend,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub key: String,
    pub backend: Backend,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub invalidated: bool,
    pub key: String,
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "quire-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /cache/{backend}/{key}
pub async fn cache_get(
    State(state): State<AppState>,
    Path((backend, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>, QuireError> {
    let backend: Backend = backend.parse()?;
    debug!("REST GET {}/{}", backend, key);

    let value = state
        .cache
        .get::<serde_json::Value>(&key, backend)
        .await
        .ok_or_else(|| QuireError::CacheMiss(key.clone()))?;

    Ok(Json(GetResponse {
        key,
        backend,
        value,
    }))
}

/// PUT /cache/{backend}/{key}
pub async fn cache_set(
    State(state): State<AppState>,
    Path((backend, key)): Path<(String, String)>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>, QuireError> {
    let backend: Backend = backend.parse()?;
    if req.ttl_secs == Some(0) {
        return Err(QuireError::TTLInvalid("ttl_secs must be positive".to_string()));
    }
    debug!("REST SET {}/{} ttl={:?}", backend, key, req.ttl_secs);

    state
        .cache
        .set(&key, &req.value, req.ttl_secs.map(Duration::from_secs), backend)
        .await;

    Ok(Json(SetResponse {
        success: true,
        key,
        backend,
    }))
}

/// DELETE /cache/keys/{key}: remove from every backend
pub async fn cache_invalidate(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<InvalidateResponse> {
    state.cache.invalidate(&key).await;
    Json(InvalidateResponse {
        invalidated: true,
        key,
    })
}

/// POST /cache/clear
pub async fn cache_clear(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.cache.clear().await;
    Json(json!({ "cleared": true }))
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<QueryCacheStats> {
    Json(state.cache.stats())
}
