//! Provider documents in the store.

use tracing::debug;

use super::cache::ProviderCache;
use super::ProviderError;
use crate::models::{collections, AiProvider, ProviderDescriptor};
use crate::store::DocumentStore;

/// Sort providers the way they are tried: priority, then id.
pub fn sort_by_priority(providers: &mut [AiProvider]) {
    providers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}

/// Access to the `ai_providers` collection.
#[derive(Clone, Debug)]
pub struct ProviderRepository {
    store: DocumentStore,
}

impl ProviderRepository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// All providers in priority order.
    pub async fn list(&self) -> Result<Vec<AiProvider>, ProviderError> {
        let mut providers: Vec<AiProvider> = self.store.list(collections::AI_PROVIDERS).await?;
        sort_by_priority(&mut providers);
        Ok(providers)
    }

    /// Enabled providers in priority order.
    pub async fn list_enabled(&self) -> Result<Vec<AiProvider>, ProviderError> {
        let mut providers = self.list().await?;
        providers.retain(|p| p.enabled);
        Ok(providers)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AiProvider>, ProviderError> {
        Ok(self.store.get(collections::AI_PROVIDERS, id).await?)
    }

    /// Replace a provider document.
    pub async fn save(&self, provider: &AiProvider) -> Result<(), ProviderError> {
        self.store
            .set(collections::AI_PROVIDERS, &provider.id, provider)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ProviderError> {
        Ok(self.store.delete(collections::AI_PROVIDERS, id).await?)
    }

    /// Create a provider or edit its descriptor fields.
    ///
    /// Health fields of an existing provider are kept as they are.
    pub async fn upsert(&self, descriptor: ProviderDescriptor) -> Result<AiProvider, ProviderError> {
        let id = descriptor
            .id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let provider = self
            .store
            .run_transaction(|txn| {
                let id = id.clone();
                let descriptor = descriptor.clone();
                Box::pin(async move {
                    let existing: Option<AiProvider> =
                        txn.get(collections::AI_PROVIDERS, &id).await?;
                    let mut provider = existing
                        .unwrap_or_else(|| AiProvider::new(id.clone(), String::new(), String::new()));
                    descriptor.apply_to(&mut provider);
                    provider.id = id.clone();

                    if provider.name.trim().is_empty() || provider.endpoint.trim().is_empty() {
                        return Ok(Err(ProviderError::Invalid(
                            "name and endpoint are required".to_string(),
                        )));
                    }

                    txn.set(collections::AI_PROVIDERS, &id, &provider)?;
                    Ok(Ok(provider))
                })
            })
            .await??;

        debug!("Saved provider {}", provider.id);
        Ok(provider)
    }

    /// Enabled, unpaused providers in priority order, served from `cache`.
    pub async fn active(&self, cache: &ProviderCache) -> Result<Vec<AiProvider>, ProviderError> {
        let now = chrono::Utc::now();
        if let Some(providers) = cache.get_active(now) {
            return Ok(providers);
        }

        let generation = cache.generation();
        let enabled = self.list_enabled().await?;
        let active = enabled.iter().filter(|p| p.is_active(now)).cloned().collect();
        cache.put(generation, enabled);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (ProviderRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = DocumentStore::from_path(&dir.path().join("providers.db"));
        store.init_schema().await.unwrap();
        (ProviderRepository::new(store), dir)
    }

    #[tokio::test]
    async fn test_list_sorted_by_priority() {
        let (repo, _dir) = setup().await;
        for (id, priority) in [("c", 3), ("a", 1), ("b", 1)] {
            repo.save(&AiProvider::new(id, id, "https://x.test").with_priority(priority))
                .await
                .unwrap();
        }

        let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_upsert_preserves_health_fields() {
        let (repo, _dir) = setup().await;
        let mut provider = AiProvider::new("p1", "Groq", "https://api.groq.com/openai/v1");
        provider.failure_count = 4;
        provider.last_error = Some("HTTP 500".to_string());
        repo.save(&provider).await.unwrap();

        let edited = repo
            .upsert(ProviderDescriptor {
                id: Some("p1".to_string()),
                priority: Some(7),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(edited.priority, 7);
        assert_eq!(edited.failure_count, 4);
        assert_eq!(edited.last_error.as_deref(), Some("HTTP 500"));
    }

    #[tokio::test]
    async fn test_upsert_requires_name_and_endpoint() {
        let (repo, _dir) = setup().await;

        let err = repo
            .upsert(ProviderDescriptor {
                name: Some("No endpoint".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_uses_cache_until_invalidated() {
        let (repo, _dir) = setup().await;
        let cache = ProviderCache::new();
        repo.save(&AiProvider::new("p1", "P1", "https://x.test"))
            .await
            .unwrap();

        assert_eq!(repo.active(&cache).await.unwrap().len(), 1);

        let mut disabled = AiProvider::new("p1", "P1", "https://x.test");
        disabled.enabled = false;
        repo.save(&disabled).await.unwrap();

        // Still cached.
        assert_eq!(repo.active(&cache).await.unwrap().len(), 1);

        cache.invalidate();
        assert!(repo.active(&cache).await.unwrap().is_empty());
    }
}
