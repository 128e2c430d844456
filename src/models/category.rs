//! Category model.

use serde::{Deserialize, Serialize};

/// A news category with a denormalized published-article counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Number of published articles in this category.
    #[serde(default)]
    pub count: i64,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            slug: None,
            count: 0,
        }
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    /// Counter value after applying `delta`, floored at zero.
    pub fn adjusted_count(&self, delta: i64) -> i64 {
        self.count.saturating_add(delta).max(0)
    }
}
