//! Admin news endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use super::super::error::ApiError;
use super::super::extract::AdminUser;
use super::super::AppState;
use super::{json_body, required_bool, required_str};

/// `POST /news/update-status` with `{id, published}`.
pub async fn update_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let id = required_str(&body, "id")?;
    let published = required_bool(&body, "published")?;

    let outcome = state.publish.set_publish_state(&id, published).await?;
    info!(
        "{} set article {} published={}",
        admin.email, id, published
    );

    Ok(Json(json!({ "success": true, "id": id, "result": outcome })))
}

/// `POST /news/delete` with `{id}`.
pub async fn delete_article(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let id = required_str(&body, "id")?;

    let outcome = state.publish.delete_article(&id).await?;
    info!("{} deleted article {}", admin.email, id);

    Ok(Json(json!({ "success": true, "id": id, "result": outcome })))
}
