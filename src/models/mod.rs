//! Data models for khobor.

mod admin;
mod article;
mod category;
mod health_report;
mod provider;

pub use admin::AdminRecord;
pub use article::Article;
pub use category::Category;
pub use health_report::{HealthCheckLog, HealthCheckReport, ProviderCheck, RecoveryReport};
pub use provider::{
    mask_api_key, AiProvider, HealthStatus, ProviderDescriptor, ProviderKind, ProviderStatus,
    DEFAULT_PROBE_TIMEOUT_MS,
};

/// Collection names in the document store.
pub mod collections {
    /// News articles.
    pub const NEWS: &str = "news";
    /// Categories with published-article counters.
    pub const CATEGORIES: &str = "categories";
    /// AI summary providers.
    pub const AI_PROVIDERS: &str = "ai_providers";
    /// Admin registry, keyed by lower-cased email.
    pub const ADMINS: &str = "admins";
    /// Health-check run history.
    pub const AI_HEALTH_LOGS: &str = "ai_health_logs";
}
