//! HTTP request handlers.

mod cron;
mod news;
mod providers;
mod public;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde_json::Value;

use super::error::ApiError;

pub use cron::ai_health;
pub use news::{delete_article, update_status};
pub use providers::{
    active_providers, delete_provider, list_providers, test_provider, upsert_provider,
};
pub use public::{health, list_categories, list_published_news};

/// Unwrap a JSON body, turning malformed input into a 400.
fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::Invalid(format!("Invalid JSON body: {}", e.body_text())))
}

/// A required, non-empty string field.
fn required_str(body: &Value, field: &str) -> Result<String, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Invalid(format!("'{}' is required", field)))
}

/// A required boolean field.
fn required_bool(body: &Value, field: &str) -> Result<bool, ApiError> {
    body.get(field)
        .and_then(Value::as_bool)
        .ok_or_else(|| ApiError::Invalid(format!("'{}' must be a boolean", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_fields() {
        let body = json!({"id": " a1 ", "published": true, "blank": "", "flag": "yes"});
        assert_eq!(required_str(&body, "id").unwrap(), "a1");
        assert!(required_str(&body, "blank").is_err());
        assert!(required_str(&body, "missing").is_err());
        assert!(required_bool(&body, "published").unwrap());
        assert!(required_bool(&body, "flag").is_err());
    }
}
