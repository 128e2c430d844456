//! Health-check run reports and their persisted log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provider::ProviderStatus;

/// Outcome of testing a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCheck {
    pub id: String,
    pub name: String,
    pub success: bool,
    pub status: ProviderStatus,
    #[serde(rename = "latencyMs", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Partition produced by the recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub recovered: Vec<String>,
    #[serde(rename = "stillFailed")]
    pub still_failed: Vec<String>,
}

/// Result of a full health-check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckReport {
    #[serde(rename = "checkedAt")]
    pub checked_at: DateTime<Utc>,
    pub results: Vec<ProviderCheck>,
    pub recovery: RecoveryReport,
}

impl HealthCheckReport {
    pub fn new(checked_at: DateTime<Utc>) -> Self {
        Self {
            checked_at,
            results: Vec::new(),
            recovery: RecoveryReport::default(),
        }
    }

    /// Providers whose regular check succeeded.
    pub fn online_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Providers whose regular check failed.
    pub fn offline_count(&self) -> usize {
        self.results.len() - self.online_count()
    }
}

/// A health-check run as written to the `ai_health_logs` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckLog {
    pub id: String,
    /// Hostname of the process that ran the check.
    pub host: Option<String>,
    pub version: Option<String>,
    pub online: usize,
    pub offline: usize,
    #[serde(flatten)]
    pub report: HealthCheckReport,
}

impl HealthCheckLog {
    pub fn from_report(report: &HealthCheckReport) -> Self {
        Self {
            id: format!(
                "{}-{}",
                report.checked_at.format("%Y%m%dT%H%M%S"),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            host: get_hostname(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            online: report.online_count(),
            offline: report.offline_count(),
            report: report.clone(),
        }
    }
}

fn get_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(id: &str, success: bool) -> ProviderCheck {
        ProviderCheck {
            id: id.to_string(),
            name: id.to_uppercase(),
            success,
            status: if success {
                ProviderStatus::Online
            } else {
                ProviderStatus::Offline
            },
            latency_ms: Some(12),
            message: None,
        }
    }

    #[test]
    fn test_report_counts() {
        let mut report = HealthCheckReport::new(Utc::now());
        report.results.push(check("p1", true));
        report.results.push(check("p2", false));
        report.results.push(check("p3", true));

        assert_eq!(report.online_count(), 2);
        assert_eq!(report.offline_count(), 1);
    }

    #[test]
    fn test_log_flattens_report() {
        let mut report = HealthCheckReport::new(Utc::now());
        report.results.push(check("p1", true));
        report.recovery.recovered.push("p2".to_string());

        let log = HealthCheckLog::from_report(&report);
        let value = serde_json::to_value(&log).unwrap();

        assert_eq!(value["online"], 1);
        assert_eq!(value["recovery"]["recovered"][0], "p2");
        assert!(value["recovery"]["stillFailed"].as_array().unwrap().is_empty());
        assert!(value["checkedAt"].is_string());
        assert!(!log.id.is_empty());
    }
}
