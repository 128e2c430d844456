//! Store utilities.

use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind};

/// Simple error info wrapper for database errors.
#[derive(Debug)]
pub struct DbErrorInfo(pub String);

impl DatabaseErrorInformation for DbErrorInfo {
    fn message(&self) -> &str {
        &self.0
    }
    fn details(&self) -> Option<&str> {
        None
    }
    fn hint(&self) -> Option<&str> {
        None
    }
    fn table_name(&self) -> Option<&str> {
        None
    }
    fn column_name(&self) -> Option<&str> {
        None
    }
    fn constraint_name(&self) -> Option<&str> {
        None
    }
    fn statement_position(&self) -> Option<i32> {
        None
    }
}

/// Convert any displayable error to a diesel error with proper message.
pub fn to_diesel_error(e: impl std::fmt::Display) -> diesel::result::Error {
    diesel::result::Error::DatabaseError(
        DatabaseErrorKind::Unknown,
        Box::new(DbErrorInfo(e.to_string())),
    )
}

/// Whether a diesel error means another writer got there first.
///
/// SQLite reports lock contention as a generic database error, so the
/// message is the only signal available.
pub fn is_contention(e: &diesel::result::Error) -> bool {
    match e {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => true,
        diesel::result::Error::DatabaseError(_, info) => {
            let msg = info.message().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("busy")
        }
        _ => false,
    }
}

/// Merge a patch into a JSON document, overwriting top-level fields.
///
/// Explicit nulls in the patch are kept as nulls, not removed.
pub fn merge_top_level(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target), Some(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}
