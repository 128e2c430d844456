//! Publish-state transitions and category counter maintenance.
//!
//! A category's `count` is the number of published articles that reference
//! it. Every change to an article's `published_at` and the matching counter
//! adjustment are written in one document-store transaction, so a reader
//! never sees one without the other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{collections, Article, Category};
use crate::store::{DocumentStore, StoreError, Transaction};

/// Errors from publish-state operations.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to a category counter inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CountAdjustment {
    Adjusted {
        category_id: String,
        from: i64,
        to: i64,
    },
    /// The reference did not resolve to a category document.
    Skipped { category_id: String },
}

/// Result of [`PublishStateController::set_publish_state`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published {
        published_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<CountAdjustment>,
    },
    Unpublished {
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<CountAdjustment>,
    },
    /// Already in the desired state; nothing was written.
    Unchanged { published: bool },
    NotFound,
}

/// Result of [`PublishStateController::delete_article`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted {
        was_published: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<CountAdjustment>,
    },
    NotFound,
}

/// Apply `delta` to a category counter inside the caller's transaction.
///
/// Reads the category and buffers the new count, floored at zero. Must run
/// before the caller buffers its own writes.
pub async fn adjust_count(
    txn: &mut Transaction,
    category_id: &str,
    delta: i64,
) -> Result<CountAdjustment, StoreError> {
    let category: Option<Category> = txn.get(collections::CATEGORIES, category_id).await?;

    match category {
        Some(category) => {
            let to = category.adjusted_count(delta);
            txn.update(collections::CATEGORIES, category_id, json!({ "count": to }))?;
            Ok(CountAdjustment::Adjusted {
                category_id: category_id.to_string(),
                from: category.count,
                to,
            })
        }
        None => Ok(CountAdjustment::Skipped {
            category_id: category_id.to_string(),
        }),
    }
}

fn log_adjustment(article_id: &str, adjustment: Option<&CountAdjustment>) {
    match adjustment {
        Some(CountAdjustment::Adjusted {
            category_id,
            from,
            to,
        }) => debug!(
            "Category {} count {} -> {} (article {})",
            category_id, from, to, article_id
        ),
        Some(CountAdjustment::Skipped { category_id }) => warn!(
            "Article {} references unknown category '{}'; count not adjusted",
            article_id, category_id
        ),
        None => {}
    }
}

fn require_id(article_id: &str) -> Result<String, PublishError> {
    let id = article_id.trim();
    if id.is_empty() {
        return Err(PublishError::Invalid("article id is required".to_string()));
    }
    Ok(id.to_string())
}

/// Owns article publish state and the category counters derived from it.
#[derive(Clone, Debug)]
pub struct PublishStateController {
    store: DocumentStore,
}

impl PublishStateController {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Publish or unpublish an article.
    ///
    /// Repeating a call with the same desired state is a no-op. A missing
    /// article yields [`PublishOutcome::NotFound`] rather than an error.
    pub async fn set_publish_state(
        &self,
        article_id: &str,
        desired: bool,
    ) -> Result<PublishOutcome, PublishError> {
        let article_id = require_id(article_id)?;

        let outcome = self
            .store
            .run_transaction(|txn| {
                let article_id = article_id.clone();
                let desired = desired;
                Box::pin(async move {
                    let article: Option<Article> = txn.get(collections::NEWS, &article_id).await?;
                    let Some(article) = article else {
                        return Ok(PublishOutcome::NotFound);
                    };

                    if article.is_published() == desired {
                        return Ok(PublishOutcome::Unchanged { published: desired });
                    }

                    let delta = if desired { 1 } else { -1 };
                    let category = match article.category_ref() {
                        Some(category_id) => Some(adjust_count(txn, category_id, delta).await?),
                        None => None,
                    };

                    if desired {
                        let published_at = Utc::now();
                        txn.update(
                            collections::NEWS,
                            &article_id,
                            json!({ "published_at": published_at }),
                        )?;
                        Ok(PublishOutcome::Published {
                            published_at,
                            category,
                        })
                    } else {
                        txn.update(
                            collections::NEWS,
                            &article_id,
                            json!({ "published_at": null }),
                        )?;
                        Ok(PublishOutcome::Unpublished { category })
                    }
                })
            })
            .await?;

        match &outcome {
            PublishOutcome::Published { category, .. } => {
                info!("Published article {}", article_id);
                log_adjustment(&article_id, category.as_ref());
            }
            PublishOutcome::Unpublished { category } => {
                info!("Unpublished article {}", article_id);
                log_adjustment(&article_id, category.as_ref());
            }
            PublishOutcome::Unchanged { published } => {
                debug!(
                    "Article {} already {}",
                    article_id,
                    if *published { "published" } else { "unpublished" }
                );
            }
            PublishOutcome::NotFound => {
                debug!("Publish state change for missing article {}", article_id);
            }
        }

        Ok(outcome)
    }

    /// Delete an article, releasing its category count if it was published.
    pub async fn delete_article(&self, article_id: &str) -> Result<DeleteOutcome, PublishError> {
        let article_id = require_id(article_id)?;

        let outcome = self
            .store
            .run_transaction(|txn| {
                let article_id = article_id.clone();
                Box::pin(async move {
                    let article: Option<Article> = txn.get(collections::NEWS, &article_id).await?;
                    let Some(article) = article else {
                        return Ok(DeleteOutcome::NotFound);
                    };

                    let was_published = article.is_published();
                    let category = match article.category_ref() {
                        Some(category_id) if was_published => {
                            Some(adjust_count(txn, category_id, -1).await?)
                        }
                        _ => None,
                    };

                    txn.delete(collections::NEWS, &article_id);
                    Ok(DeleteOutcome::Deleted {
                        was_published,
                        category,
                    })
                })
            })
            .await?;

        match &outcome {
            DeleteOutcome::Deleted { category, .. } => {
                info!("Deleted article {}", article_id);
                log_adjustment(&article_id, category.as_ref());
            }
            DeleteOutcome::NotFound => debug!("Delete of missing article {}", article_id),
        }

        Ok(outcome)
    }
}
