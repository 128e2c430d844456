//! HTTP API for the news backend.
//!
//! Public reads of categories and published news, admin-only publish-state
//! and AI provider management, and the scheduled provider health check.

mod error;
mod extract;
mod handlers;
mod routes;

pub use error::ApiError;
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::{AdminGuard, JwtVerifier, TokenVerifier};
use crate::config::Settings;
use crate::providers::{HealthController, HttpProbe, ProviderCache};
use crate::publish::PublishStateController;
use crate::store::DocumentStore;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub publish: PublishStateController,
    pub health: HealthController,
    pub guard: AdminGuard,
    /// Bearer secret for `/cron/*`; `None` leaves those routes open.
    pub cron_secret: Option<Arc<str>>,
}

impl AppState {
    /// Assemble state from already-built services.
    pub fn from_parts(
        store: DocumentStore,
        verifier: Arc<dyn TokenVerifier>,
        health: HealthController,
        cron_secret: Option<&str>,
    ) -> Self {
        Self {
            publish: PublishStateController::new(store.clone()),
            guard: AdminGuard::new(verifier, store.clone()),
            store,
            health,
            cron_secret: cron_secret.map(Arc::from),
        }
    }

    /// Build production state from settings, creating the schema if needed.
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let secret = settings.jwt_secret.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No JWT secret configured (set KHOBOR_JWT_SECRET or auth.jwt_secret)")
        })?;

        let mut verifier = JwtVerifier::new(secret.as_bytes());
        if let Some(ref issuer) = settings.jwt_issuer {
            verifier = verifier.with_issuer(issuer.as_str());
        }
        if let Some(ref audience) = settings.jwt_audience {
            verifier = verifier.with_audience(audience.as_str());
        }

        let store = settings.open_store();
        store.init_schema().await?;
        let health = health_controller(settings, store.clone())?;

        if settings.cron_secret.is_none() {
            tracing::warn!("CRON_SECRET is not set; /cron endpoints are unauthenticated");
        }

        Ok(Self::from_parts(
            store,
            Arc::new(verifier),
            health,
            settings.cron_secret.as_deref(),
        ))
    }
}

/// Health controller probing over HTTP with the configured timings.
pub fn health_controller(
    settings: &Settings,
    store: DocumentStore,
) -> anyhow::Result<HealthController> {
    let probe = HttpProbe::new()?;
    let cache = Arc::new(ProviderCache::with_ttl(settings.provider_cache_ttl));
    Ok(HealthController::new(store, Arc::new(probe), cache)
        .with_cooldown(settings.recovery_cooldown)
        .with_probe_timeout_ms(settings.probe_timeout_ms)
        .with_log_retention(settings.health_log_retention))
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings).await?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::models::{collections, AdminRecord, AiProvider, Article, Category};
    use crate::providers::{ProbeResult, ProviderProbe};

    const SECRET: &[u8] = b"server-test-secret";
    const ADMIN: &str = "editor@khobor.test";

    struct StaticProbe;

    #[async_trait]
    impl ProviderProbe for StaticProbe {
        async fn test_connection(&self, provider: &AiProvider) -> ProbeResult {
            if provider.endpoint.contains("down") {
                ProbeResult::failed(Some(3), "HTTP 503")
            } else {
                ProbeResult::ok(12, "pong")
            }
        }
    }

    struct TestApp {
        router: axum::Router,
        store: DocumentStore,
        verifier: Arc<JwtVerifier>,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        fn token(&self, email: &str) -> String {
            let token = self
                .verifier
                .issue(email, chrono::Duration::minutes(5))
                .unwrap();
            format!("Bearer {}", token)
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
            (status, json)
        }

        async fn post(&self, uri: &str, auth: Option<&str>, body: &str) -> (StatusCode, Value) {
            let mut builder = Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json");
            if let Some(auth) = auth {
                builder = builder.header("authorization", auth);
            }
            self.send(builder.body(Body::from(body.to_string())).unwrap())
                .await
        }

        async fn get(&self, uri: &str, auth: Option<&str>) -> (StatusCode, Value) {
            let mut builder = Request::builder().uri(uri);
            if let Some(auth) = auth {
                builder = builder.header("authorization", auth);
            }
            self.send(builder.body(Body::empty()).unwrap()).await
        }
    }

    async fn setup_test_app(cron_secret: Option<&str>) -> TestApp {
        let dir = tempdir().unwrap();
        let store = DocumentStore::from_path(&dir.path().join("test.db"));
        store.init_schema().await.unwrap();

        let admin = AdminRecord::new(ADMIN, None);
        store
            .set(collections::ADMINS, &admin.id, &admin)
            .await
            .unwrap();

        let verifier = Arc::new(JwtVerifier::new(SECRET));
        let health = HealthController::new(
            store.clone(),
            Arc::new(StaticProbe),
            Arc::new(ProviderCache::new()),
        );
        let state = AppState::from_parts(store.clone(), verifier.clone(), health, cron_secret);

        TestApp {
            router: create_router(state),
            store,
            verifier,
            _dir: dir,
        }
    }

    async fn seed_news(store: &DocumentStore) {
        store
            .set(
                collections::CATEGORIES,
                "sports",
                &Category::new("sports", "খেলা").with_count(3),
            )
            .await
            .unwrap();
        store
            .set(
                collections::NEWS,
                "a1",
                &Article::new("a1", "ম্যাচ জিতল বাংলাদেশ").with_category_id("sports"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = setup_test_app(None).await;
        let (status, json) = app.get("/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_update_status_requires_token() {
        let app = setup_test_app(None).await;
        seed_news(&app.store).await;

        let (status, json) = app
            .post("/news/update-status", None, r#"{"id":"a1","published":true}"#)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);

        let (status, _) = app
            .post(
                "/news/update-status",
                Some("Bearer garbage"),
                r#"{"id":"a1","published":true}"#,
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_update_status_rejects_non_admin() {
        let app = setup_test_app(None).await;
        seed_news(&app.store).await;

        let auth = app.token("reader@khobor.test");
        let (status, json) = app
            .post(
                "/news/update-status",
                Some(&auth),
                r#"{"id":"a1","published":true}"#,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["success"], false);

        let category: Category = app
            .store
            .get(collections::CATEGORIES, "sports")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category.count, 3);
    }

    #[tokio::test]
    async fn test_update_status_validates_body() {
        let app = setup_test_app(None).await;
        let auth = app.token(ADMIN);

        let (status, _) = app
            .post("/news/update-status", Some(&auth), "{not json")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = app
            .post(
                "/news/update-status",
                Some(&auth),
                r#"{"id":"a1","published":"yes"}"#,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("published"));

        let (status, _) = app
            .post("/news/update-status", Some(&auth), r#"{"published":true}"#)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_updates_counter() {
        let app = setup_test_app(None).await;
        seed_news(&app.store).await;
        let auth = app.token(ADMIN);

        let (status, json) = app
            .post(
                "/news/update-status",
                Some(&auth),
                r#"{"id":"a1","published":true}"#,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["result"]["outcome"], "published");
        assert_eq!(json["result"]["category"]["to"], 4);

        // Repeating is a no-op
        let (_, json) = app
            .post(
                "/news/update-status",
                Some(&auth),
                r#"{"id":"a1","published":true}"#,
            )
            .await;
        assert_eq!(json["result"]["outcome"], "unchanged");

        let category: Category = app
            .store
            .get(collections::CATEGORIES, "sports")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category.count, 4);

        let (status, json) = app.get("/news", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["id"], "a1");
    }

    #[tokio::test]
    async fn test_delete_published_article() {
        let app = setup_test_app(None).await;
        seed_news(&app.store).await;
        let auth = app.token(ADMIN);

        app.post(
            "/news/update-status",
            Some(&auth),
            r#"{"id":"a1","published":true}"#,
        )
        .await;
        let (status, json) = app
            .post("/news/delete", Some(&auth), r#"{"id":"a1"}"#)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"]["was_published"], true);

        let (_, json) = app.get("/categories", None).await;
        assert_eq!(json[0]["count"], 3);
    }

    #[tokio::test]
    async fn test_cron_secret_enforced() {
        let app = setup_test_app(Some("tick-tock")).await;

        let (status, _) = app.get("/cron/ai-health", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .get("/cron/ai-health", Some("Bearer wrong"))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, json) = app
            .get("/cron/ai-health", Some("Bearer tick-tock"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn test_cron_run_records_status() {
        let app = setup_test_app(None).await;
        let repo = crate::providers::ProviderRepository::new(app.store.clone());
        repo.save(&AiProvider::new("up", "Up", "https://api.up.test/v1").with_priority(1))
            .await
            .unwrap();
        repo.save(&AiProvider::new("down", "Down", "https://down.test/v1").with_priority(2))
            .await
            .unwrap();

        let (status, json) = app.get("/cron/ai-health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["online"], 1);
        assert_eq!(json["offline"], 1);

        let down = repo.get("down").await.unwrap().unwrap();
        assert_eq!(down.failure_count, 1);
        assert!(down.paused_until.is_some());
    }

    #[tokio::test]
    async fn test_provider_list_masks_keys() {
        let app = setup_test_app(None).await;
        let auth = app.token(ADMIN);

        let body = json!({
            "name": "Groq",
            "endpoint": "https://api.groq.com/openai/v1",
            "apiKey": "gsk_live_1234567890abcdef",
            "priority": 5
        });
        let (status, json) = app
            .post("/ai/providers", Some(&auth), &body.to_string())
            .await;
        assert_eq!(status, StatusCode::OK);
        let id = json["provider"]["id"].as_str().unwrap().to_string();

        let (status, json) = app.get("/ai/providers", Some(&auth)).await;
        assert_eq!(status, StatusCode::OK);
        let key = json["providers"][0]["apiKey"].as_str().unwrap();
        assert!(!key.contains("1234567890"));

        let stored = crate::providers::ProviderRepository::new(app.store.clone())
            .get(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.api_key.as_deref(), Some("gsk_live_1234567890abcdef"));

        let (status, _) = app.get("/ai/providers", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_provider_test_unknown_id() {
        let app = setup_test_app(None).await;
        let auth = app.token(ADMIN);

        let (status, json) = app
            .post("/ai/providers/test", Some(&auth), r#"{"id":"nope"}"#)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
    }
}
