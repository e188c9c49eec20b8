use super::handlers::{self, AppState};
use super::rate_limit::rate_limit_middleware;
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all endpoints
///
/// Every route, health included, sits behind the rate limiter.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limiter = state.limiter.clone();

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Cache REST API endpoints
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/clear", post(handlers::cache_clear))
        .route("/cache/keys/{key}", delete(handlers::cache_invalidate))
        .route(
            "/cache/{backend}/{key}",
            get(handlers::cache_get).put(handlers::cache_set),
        )
        // Add state and middleware
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
