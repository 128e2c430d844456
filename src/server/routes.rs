//! Router configuration for the API server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Public reads
        .route("/categories", get(handlers::list_categories))
        .route("/news", get(handlers::list_published_news))
        // Publish state (admin)
        .route("/news/update-status", post(handlers::update_status))
        .route("/news/delete", post(handlers::delete_article))
        // AI providers (admin)
        .route(
            "/ai/providers",
            get(handlers::list_providers).post(handlers::upsert_provider),
        )
        .route("/ai/providers/active", get(handlers::active_providers))
        .route("/ai/providers/delete", post(handlers::delete_provider))
        .route("/ai/providers/test", post(handlers::test_provider))
        // Scheduled jobs
        .route("/cron/ai-health", get(handlers::ai_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
