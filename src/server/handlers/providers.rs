//! Admin AI provider endpoints. API keys are always masked on the way out.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use super::super::error::ApiError;
use super::super::extract::AdminUser;
use super::super::AppState;
use super::{json_body, required_str};
use crate::models::{AiProvider, ProviderDescriptor};

fn masked(providers: Vec<AiProvider>) -> Vec<AiProvider> {
    providers.iter().map(AiProvider::redacted).collect()
}

/// `GET /ai/providers`
pub async fn list_providers(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Value>, ApiError> {
    let providers = state.health.repository().list().await?;
    Ok(Json(json!({ "success": true, "providers": masked(providers) })))
}

/// `GET /ai/providers/active`
pub async fn active_providers(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Value>, ApiError> {
    let providers = state.health.active_providers().await?;
    Ok(Json(json!({ "success": true, "providers": masked(providers) })))
}

/// `POST /ai/providers`: create a provider or edit its descriptor.
pub async fn upsert_provider(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let descriptor: ProviderDescriptor = serde_json::from_value(body)
        .map_err(|e| ApiError::Invalid(format!("Invalid provider: {}", e)))?;

    let provider = state.health.repository().upsert(descriptor).await?;
    state.health.invalidate_cache();
    info!("{} saved provider {}", admin.email, provider.id);

    Ok(Json(json!({ "success": true, "provider": provider.redacted() })))
}

/// `POST /ai/providers/delete` with `{id}`.
pub async fn delete_provider(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let id = required_str(&body, "id")?;

    let deleted = state.health.repository().delete(&id).await?;
    state.health.invalidate_cache();
    if deleted {
        info!("{} deleted provider {}", admin.email, id);
    }

    Ok(Json(json!({ "success": true, "id": id, "deleted": deleted })))
}

/// `POST /ai/providers/test` with `{id}`: test now and record the result.
pub async fn test_provider(
    State(state): State<AppState>,
    _admin: AdminUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let id = required_str(&body, "id")?;

    let check = state.health.check_provider(&id).await?;
    Ok(Json(json!({ "success": true, "result": check })))
}
