//! Request extractors enforcing admin and cron authorization.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::error::ApiError;
use super::AppState;
use crate::auth::{bearer_token, AdminPrincipal};

fn authorization(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// A request made by a verified admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AdminPrincipal);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let principal = state.guard.require_admin(authorization(parts)).await?;
        Ok(Self(principal))
    }
}

/// A request allowed to trigger scheduled jobs.
///
/// Open when no cron secret is configured; otherwise the request must send
/// `Authorization: Bearer <secret>`.
#[derive(Debug, Clone, Copy)]
pub struct CronAuth;

#[axum::async_trait]
impl FromRequestParts<AppState> for CronAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let Some(secret) = state.cron_secret.as_deref() else {
            return Ok(Self);
        };
        match authorization(parts).and_then(bearer_token) {
            Some(token) if token == secret => Ok(Self),
            Some(_) => Err(ApiError::Unauthorized("Invalid cron secret".to_string())),
            None => Err(ApiError::Unauthorized("Missing cron secret".to_string())),
        }
    }
}
