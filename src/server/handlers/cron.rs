//! Scheduled job endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::super::error::ApiError;
use super::super::extract::CronAuth;
use super::super::AppState;

/// `GET /cron/ai-health`: one full provider health-check run.
pub async fn ai_health(
    State(state): State<AppState>,
    _auth: CronAuth,
) -> Result<Json<Value>, ApiError> {
    let report = state.health.run().await?;
    Ok(Json(json!({
        "success": true,
        "checkedAt": report.checked_at,
        "online": report.online_count(),
        "offline": report.offline_count(),
        "results": report.results,
        "recovery": report.recovery,
    })))
}
