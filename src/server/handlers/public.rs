//! Unauthenticated read endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::super::error::ApiError;
use super::super::AppState;
use crate::models::{collections, Article, Category};

const DEFAULT_NEWS_LIMIT: usize = 50;
const MAX_NEWS_LIMIT: usize = 200;

/// Liveness, including a database round trip.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.test_connection().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "error": e.to_string() })),
        ),
    }
}

/// `GET /categories`: categories with their published counts, by name.
pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    let mut categories: Vec<Category> = state.store.list(collections::CATEGORIES).await?;
    categories.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    Ok(Json(categories))
}

#[derive(Debug, Deserialize)]
pub struct NewsParams {
    pub limit: Option<usize>,
}

/// `GET /news?limit=N`: published articles, newest first.
pub async fn list_published_news(
    State(state): State<AppState>,
    Query(params): Query<NewsParams>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_NEWS_LIMIT)
        .clamp(1, MAX_NEWS_LIMIT);

    let mut articles: Vec<Article> = state.store.list(collections::NEWS).await?;
    articles.retain(Article::is_published);
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    articles.truncate(limit);
    Ok(Json(articles))
}
