//! Publish State Tests
//!
//! Category counters must track the number of published articles across
//! publish, unpublish and delete, including under concurrent writers.

use khobor::models::{collections, Article, Category};
use khobor::publish::{CountAdjustment, DeleteOutcome, PublishOutcome, PublishStateController};
use khobor::store::DocumentStore;
use tempfile::TempDir;

async fn setup() -> (PublishStateController, DocumentStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = DocumentStore::from_path(&dir.path().join("news.db"));
    store.init_schema().await.unwrap();
    (PublishStateController::new(store.clone()), store, dir)
}

async fn add_category(store: &DocumentStore, id: &str, count: i64) {
    store
        .set(
            collections::CATEGORIES,
            id,
            &Category::new(id, id.to_uppercase()).with_count(count),
        )
        .await
        .unwrap();
}

async fn add_article(store: &DocumentStore, article: Article) {
    store
        .set(collections::NEWS, &article.id, &article)
        .await
        .unwrap();
}

async fn count_of(store: &DocumentStore, id: &str) -> i64 {
    store
        .get::<Category>(collections::CATEGORIES, id)
        .await
        .unwrap()
        .unwrap()
        .count
}

async fn article(store: &DocumentStore, id: &str) -> Option<Article> {
    store.get(collections::NEWS, id).await.unwrap()
}

#[tokio::test]
async fn publish_twice_counts_once() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 3).await;
    add_article(&store, Article::new("a1", "বাজেট পাস").with_category_id("c1")).await;

    let first = controller.set_publish_state("a1", true).await.unwrap();
    let published_at = match first {
        PublishOutcome::Published {
            published_at,
            category: Some(CountAdjustment::Adjusted { from: 3, to: 4, .. }),
        } => published_at,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(count_of(&store, "c1").await, 4);
    assert_eq!(
        article(&store, "a1").await.unwrap().published_at,
        Some(published_at)
    );

    let second = controller.set_publish_state("a1", true).await.unwrap();
    assert_eq!(second, PublishOutcome::Unchanged { published: true });
    assert_eq!(count_of(&store, "c1").await, 4);
    assert_eq!(
        article(&store, "a1").await.unwrap().published_at,
        Some(published_at)
    );
}

#[tokio::test]
async fn publish_then_unpublish_restores_count() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 7).await;
    add_article(&store, Article::new("a1", "t").with_category_id("c1")).await;

    controller.set_publish_state("a1", true).await.unwrap();
    let outcome = controller.set_publish_state("a1", false).await.unwrap();

    assert!(matches!(outcome, PublishOutcome::Unpublished { .. }));
    assert_eq!(count_of(&store, "c1").await, 7);
    assert!(article(&store, "a1").await.unwrap().published_at.is_none());
}

#[tokio::test]
async fn unpublish_of_unpublished_article_keeps_count_non_negative() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 0).await;
    add_article(&store, Article::new("a1", "t").with_category_id("c1")).await;

    let outcome = controller.set_publish_state("a1", false).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Unchanged { published: false });
    assert_eq!(count_of(&store, "c1").await, 0);
}

#[tokio::test]
async fn drifted_counter_is_floored_at_zero() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 0).await;
    // Published before counters were maintained, so the counter is behind
    add_article(
        &store,
        Article::new("a1", "t")
            .with_category_id("c1")
            .with_published_at(chrono::Utc::now()),
    )
    .await;

    controller.set_publish_state("a1", false).await.unwrap();
    assert_eq!(count_of(&store, "c1").await, 0);
}

#[tokio::test]
async fn legacy_category_field_resolves_as_document_id() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "sports", 1).await;
    add_article(&store, Article::new("a1", "t").with_legacy_category("sports")).await;

    controller.set_publish_state("a1", true).await.unwrap();
    assert_eq!(count_of(&store, "sports").await, 2);
}

#[tokio::test]
async fn unresolvable_category_is_skipped() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 2).await;
    add_article(&store, Article::new("a1", "t").with_legacy_category("খেলাধুলা")).await;

    let outcome = controller.set_publish_state("a1", true).await.unwrap();
    assert!(matches!(
        outcome,
        PublishOutcome::Published {
            category: Some(CountAdjustment::Skipped { .. }),
            ..
        }
    ));
    assert!(article(&store, "a1").await.unwrap().is_published());
    assert_eq!(count_of(&store, "c1").await, 2);
}

#[tokio::test]
async fn delete_published_article_decrements() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 0).await;
    add_article(&store, Article::new("a1", "t").with_category_id("c1")).await;
    add_article(&store, Article::new("a2", "t").with_category_id("c1")).await;

    controller.set_publish_state("a1", true).await.unwrap();
    assert_eq!(count_of(&store, "c1").await, 1);

    // Unpublished: no decrement
    let outcome = controller.delete_article("a2").await.unwrap();
    assert_eq!(
        outcome,
        DeleteOutcome::Deleted {
            was_published: false,
            category: None
        }
    );
    assert_eq!(count_of(&store, "c1").await, 1);

    let outcome = controller.delete_article("a1").await.unwrap();
    assert!(matches!(
        outcome,
        DeleteOutcome::Deleted {
            was_published: true,
            ..
        }
    ));
    assert_eq!(count_of(&store, "c1").await, 0);
    assert!(article(&store, "a1").await.is_none());
}

#[tokio::test]
async fn delete_with_unresolvable_category_leaves_counters() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 5).await;
    add_article(
        &store,
        Article::new("a1", "t")
            .with_category_id("gone")
            .with_published_at(chrono::Utc::now()),
    )
    .await;

    controller.delete_article("a1").await.unwrap();
    assert_eq!(count_of(&store, "c1").await, 5);
    assert!(store
        .get::<Category>(collections::CATEGORIES, "gone")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn missing_article_is_a_no_op() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 2).await;

    assert_eq!(
        controller.set_publish_state("ghost", true).await.unwrap(),
        PublishOutcome::NotFound
    );
    assert_eq!(
        controller.delete_article("ghost").await.unwrap(),
        DeleteOutcome::NotFound
    );
    assert_eq!(count_of(&store, "c1").await, 2);
    assert!(article(&store, "ghost").await.is_none());
}

#[tokio::test]
async fn concurrent_writers_in_one_category_all_apply() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 2).await;

    // a0..a3 start unpublished and get published; a4..a5 start published
    // and get unpublished.
    for i in 0..6 {
        let mut a = Article::new(format!("a{}", i), "t").with_category_id("c1");
        if i >= 4 {
            a = a.with_published_at(chrono::Utc::now());
        }
        add_article(&store, a).await;
    }

    let mut handles = Vec::new();
    for i in 0..6 {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            controller
                .set_publish_state(&format!("a{}", i), i < 4)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(count_of(&store, "c1").await, 2 + 4 - 2);
}

#[tokio::test]
async fn many_concurrent_publishes_fit_default_retry_budget() {
    let (controller, store, _dir) = setup().await;
    add_category(&store, "c1", 0).await;

    for i in 0..24 {
        add_article(&store, Article::new(format!("b{}", i), "t").with_category_id("c1")).await;
    }

    let mut handles = Vec::new();
    for i in 0..24 {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            controller.set_publish_state(&format!("b{}", i), true).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, PublishOutcome::Published { .. }));
    }

    assert_eq!(count_of(&store, "c1").await, 24);
}
