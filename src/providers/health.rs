//! Provider health lifecycle: test, record status, recover, invalidate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::cache::ProviderCache;
use super::probe::{ProbeResult, ProviderProbe};
use super::repository::ProviderRepository;
use super::ProviderError;
use crate::models::{
    collections, AiProvider, HealthCheckLog, HealthCheckReport, HealthStatus, ProviderCheck,
    ProviderStatus, RecoveryReport, DEFAULT_PROBE_TIMEOUT_MS,
};
use crate::store::DocumentStore;

/// How long a failed provider is kept out of rotation.
pub const DEFAULT_RECOVERY_COOLDOWN: Duration = Duration::from_secs(300);

/// Health logs kept after each run; older ones are pruned.
pub const DEFAULT_LOG_RETENTION: usize = 200;

/// Slack on top of a provider's own timeout before the controller gives up
/// on a probe that ignores it.
const PROBE_GRACE: Duration = Duration::from_secs(1);

/// Record a regular check result on a provider.
pub fn apply_check(
    provider: &mut AiProvider,
    result: &ProbeResult,
    now: DateTime<Utc>,
    cooldown: Duration,
) {
    provider.last_checked_at = Some(now);
    provider.last_latency_ms = result.latency_ms;

    if result.success {
        provider.status = Some(ProviderStatus::Online);
    } else {
        provider.status = Some(ProviderStatus::Offline);
        provider.last_error = result.message.clone();
        provider.last_failure_at = Some(now);
        provider.failure_count = provider.failure_count.saturating_add(1);
        provider.paused_until = Some(now + to_chrono(cooldown));
    }
}

/// Return a provider that answered again to rotation.
pub fn apply_recovery(provider: &mut AiProvider, result: &ProbeResult, now: DateTime<Utc>) {
    provider.last_checked_at = Some(now);
    provider.last_latency_ms = result.latency_ms;
    provider.status = Some(ProviderStatus::Online);
    provider.is_healthy = Some(true);
    provider.health_status = Some(HealthStatus::Healthy);
    provider.paused_until = None;
    provider.failure_count = 0;
    provider.last_error = None;
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

fn check_of(provider: &AiProvider, result: &ProbeResult) -> ProviderCheck {
    ProviderCheck {
        id: provider.id.clone(),
        name: provider.name.clone(),
        success: result.success,
        status: if result.success {
            ProviderStatus::Online
        } else {
            ProviderStatus::Offline
        },
        latency_ms: result.latency_ms,
        message: result.message.clone(),
    }
}

/// Keeps persisted provider status in line with connectivity tests.
#[derive(Clone)]
pub struct HealthController {
    store: DocumentStore,
    repo: ProviderRepository,
    probe: Arc<dyn ProviderProbe>,
    cache: Arc<ProviderCache>,
    cooldown: Duration,
    probe_timeout_ms: u64,
    log_retention: usize,
}

impl HealthController {
    pub fn new(
        store: DocumentStore,
        probe: Arc<dyn ProviderProbe>,
        cache: Arc<ProviderCache>,
    ) -> Self {
        Self {
            repo: ProviderRepository::new(store.clone()),
            store,
            probe,
            cache,
            cooldown: DEFAULT_RECOVERY_COOLDOWN,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            log_retention: DEFAULT_LOG_RETENTION,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_probe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.probe_timeout_ms = timeout_ms;
        self
    }

    pub fn with_log_retention(mut self, keep: usize) -> Self {
        self.log_retention = keep.max(1);
        self
    }

    pub fn repository(&self) -> &ProviderRepository {
        &self.repo
    }

    pub fn cache(&self) -> &ProviderCache {
        &self.cache
    }

    /// Enabled, unpaused providers in priority order.
    pub async fn active_providers(&self) -> Result<Vec<AiProvider>, ProviderError> {
        self.repo.active(&self.cache).await
    }

    /// Test one provider, bounded by its timeout.
    ///
    /// Providers without their own `timeout_ms` get the controller default.
    pub async fn test(&self, provider: &AiProvider) -> ProbeResult {
        let mut provider = provider.clone();
        provider.timeout_ms.get_or_insert(self.probe_timeout_ms);

        let limit = provider.probe_timeout() + PROBE_GRACE;
        match tokio::time::timeout(limit, self.probe.test_connection(&provider)).await {
            Ok(result) => result,
            Err(_) => ProbeResult::failed(
                Some(limit.as_millis() as u64),
                format!("Timed out after {} ms", limit.as_millis()),
            ),
        }
    }

    /// Persist the result of a regular check. Returns the updated provider,
    /// or `None` if it no longer exists.
    pub async fn update_status(
        &self,
        provider_id: &str,
        result: &ProbeResult,
    ) -> Result<Option<AiProvider>, ProviderError> {
        let cooldown = self.cooldown;
        let result = result.clone();
        self.modify(provider_id, move |provider, now| {
            apply_check(provider, &result, now, cooldown)
        })
        .await
    }

    async fn mark_recovered(
        &self,
        provider_id: &str,
        result: &ProbeResult,
    ) -> Result<Option<AiProvider>, ProviderError> {
        let result = result.clone();
        self.modify(provider_id, move |provider, now| {
            apply_recovery(provider, &result, now)
        })
        .await
    }

    async fn modify<F>(
        &self,
        provider_id: &str,
        change: F,
    ) -> Result<Option<AiProvider>, ProviderError>
    where
        F: Fn(&mut AiProvider, DateTime<Utc>) + Clone + Send + Sync + 'static,
    {
        let provider_id = provider_id.to_string();

        let updated = self
            .store
            .run_transaction(|txn| {
                let provider_id = provider_id.clone();
                let change = change.clone();
                Box::pin(async move {
                    let provider: Option<AiProvider> =
                        txn.get(collections::AI_PROVIDERS, &provider_id).await?;
                    let Some(mut provider) = provider else {
                        return Ok(None);
                    };
                    change(&mut provider, Utc::now());
                    txn.set(collections::AI_PROVIDERS, &provider_id, &provider)?;
                    Ok(Some(provider))
                })
            })
            .await?;

        Ok(updated)
    }

    /// Re-test providers marked offline or degraded whose cool-down has elapsed.
    pub async fn recover_degraded(&self) -> Result<RecoveryReport, ProviderError> {
        let now = Utc::now();
        let candidates: Vec<AiProvider> = self
            .repo
            .list_enabled()
            .await?
            .into_iter()
            .filter(|p| p.awaiting_recovery() && !p.is_paused(now))
            .collect();

        let mut report = RecoveryReport::default();
        for provider in candidates {
            let result = self.test(&provider).await;
            let recorded = if result.success {
                self.mark_recovered(&provider.id, &result).await
            } else {
                self.update_status(&provider.id, &result).await
            };

            match recorded {
                Ok(Some(_)) if result.success => {
                    info!("Provider {} recovered", provider.id);
                    report.recovered.push(provider.id);
                }
                Ok(Some(_)) => {
                    debug!(
                        "Provider {} still failing: {}",
                        provider.id,
                        result.message.as_deref().unwrap_or("unknown error")
                    );
                    report.still_failed.push(provider.id);
                }
                Ok(None) => debug!("Provider {} deleted during recovery", provider.id),
                Err(e) => {
                    warn!("Failed to record recovery of {}: {}", provider.id, e);
                    report.still_failed.push(provider.id);
                }
            }
        }

        Ok(report)
    }

    /// Drop the cached active-provider list.
    pub fn invalidate_cache(&self) {
        let generation = self.cache.invalidate();
        debug!("Provider cache invalidated (generation {})", generation);
    }

    /// Test one provider on demand and record the result.
    pub async fn check_provider(&self, provider_id: &str) -> Result<ProviderCheck, ProviderError> {
        let provider = self
            .repo
            .get(provider_id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(provider_id.to_string()))?;

        let result = self.test(&provider).await;
        if result.success && provider.awaiting_recovery() {
            self.mark_recovered(&provider.id, &result).await?;
        } else {
            self.update_status(&provider.id, &result).await?;
        }
        self.invalidate_cache();

        Ok(check_of(&provider, &result))
    }

    /// Full health-check run.
    ///
    /// Each enabled provider not awaiting recovery is tested once and its
    /// status recorded; the rest are left to the recovery sweep. Individual
    /// failures are reported, not raised.
    pub async fn run(&self) -> Result<HealthCheckReport, ProviderError> {
        let now = Utc::now();
        let mut report = HealthCheckReport::new(now);

        let providers = self.repo.list_enabled().await?;
        info!("Health check over {} enabled providers", providers.len());

        for provider in &providers {
            if provider.awaiting_recovery() {
                continue;
            }
            if provider.is_paused(now) {
                debug!("Skipping paused provider {}", provider.id);
                continue;
            }

            let result = self.test(provider).await;
            if !result.success {
                warn!(
                    "Provider {} failed its check: {}",
                    provider.id,
                    result.message.as_deref().unwrap_or("unknown error")
                );
            }
            if let Err(e) = self.update_status(&provider.id, &result).await {
                warn!("Failed to record status of {}: {}", provider.id, e);
            }
            report.results.push(check_of(provider, &result));
        }

        match self.recover_degraded().await {
            Ok(recovery) => report.recovery = recovery,
            Err(e) => warn!("Recovery sweep failed: {}", e),
        }

        self.invalidate_cache();

        let log = HealthCheckLog::from_report(&report);
        if let Err(e) = self
            .store
            .set(collections::AI_HEALTH_LOGS, &log.id, &log)
            .await
        {
            warn!("Failed to write health log: {}", e);
        } else if let Err(e) = self.prune_logs().await {
            warn!("Failed to prune health logs: {}", e);
        }

        info!(
            "Health check done: {} online, {} offline, {} recovered, {} still failing",
            report.online_count(),
            report.offline_count(),
            report.recovery.recovered.len(),
            report.recovery.still_failed.len()
        );
        Ok(report)
    }

    /// Delete all but the newest `log_retention` health logs.
    async fn prune_logs(&self) -> Result<usize, ProviderError> {
        let mut logs: Vec<HealthCheckLog> = self.store.list(collections::AI_HEALTH_LOGS).await?;
        if logs.len() <= self.log_retention {
            return Ok(0);
        }

        logs.sort_by(|a, b| {
            b.report
                .checked_at
                .cmp(&a.report.checked_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let mut removed = 0;
        for log in &logs[self.log_retention..] {
            if self.store.delete(collections::AI_HEALTH_LOGS, &log.id).await? {
                removed += 1;
            }
        }
        debug!("Pruned {} health logs", removed);
        Ok(removed)
    }
}

impl std::fmt::Debug for HealthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthController")
            .field("cooldown", &self.cooldown)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("log_retention", &self.log_retention)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_check_pauses_provider() {
        let now = Utc::now();
        let mut provider = AiProvider::new("p1", "P1", "https://x.test");
        provider.failure_count = 1;

        apply_check(
            &mut provider,
            &ProbeResult::failed(Some(40), "HTTP 503"),
            now,
            Duration::from_secs(300),
        );

        assert_eq!(provider.status, Some(ProviderStatus::Offline));
        assert_eq!(provider.failure_count, 2);
        assert_eq!(provider.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(provider.last_failure_at, Some(now));
        assert_eq!(
            provider.paused_until,
            Some(now + chrono::Duration::seconds(300))
        );
        assert!(!provider.is_active(now));
        // Score evolution belongs to generation, not to checks.
        assert_eq!(provider.health_score, None);
    }

    #[test]
    fn test_successful_check_keeps_failure_history() {
        let now = Utc::now();
        let mut provider = AiProvider::new("p1", "P1", "https://x.test");
        provider.failure_count = 2;

        apply_check(&mut provider, &ProbeResult::ok(12, "OK"), now, Duration::from_secs(300));

        assert_eq!(provider.status, Some(ProviderStatus::Online));
        assert_eq!(provider.last_latency_ms, Some(12));
        assert_eq!(provider.failure_count, 2);
    }

    #[test]
    fn test_recovery_clears_failure_state() {
        let now = Utc::now();
        let mut provider = AiProvider::new("p1", "P1", "https://x.test");
        provider.status = Some(ProviderStatus::Offline);
        provider.health_status = Some(HealthStatus::Degraded);
        provider.is_healthy = Some(false);
        provider.failure_count = 5;
        provider.last_error = Some("timeout".to_string());
        provider.paused_until = Some(now - chrono::Duration::minutes(1));

        apply_recovery(&mut provider, &ProbeResult::ok(80, "OK"), now);

        assert_eq!(provider.status, Some(ProviderStatus::Online));
        assert_eq!(provider.health_status, Some(HealthStatus::Healthy));
        assert_eq!(provider.is_healthy, Some(true));
        assert_eq!(provider.failure_count, 0);
        assert!(provider.paused_until.is_none());
        assert!(provider.last_error.is_none());
        assert!(!provider.awaiting_recovery());
    }
}
