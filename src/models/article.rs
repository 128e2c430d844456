//! News article model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news article ingested from an RSS feed.
///
/// An article is published exactly when `published_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Feed the article was ingested from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Legacy category name or slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Category document id.
    #[serde(
        default,
        rename = "categoryId",
        skip_serializing_if = "Option::is_none"
    )]
    pub category_id: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Create an unpublished article.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: None,
            source: None,
            summary: None,
            category: None,
            category_id: None,
            published_at: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_category_id(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_legacy_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Category document id this article counts towards.
    ///
    /// `categoryId` wins; otherwise the legacy `category` value is tried
    /// verbatim as a document id. Whether it resolves is only known once the
    /// category document is read.
    pub fn category_ref(&self) -> Option<&str> {
        self.category_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.category
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            })
    }
}
