//! AI provider failover: adapters, connectivity probes, health tracking
//! and the active-provider cache.

pub mod adapter;
pub mod cache;
pub mod health;
pub mod probe;
pub mod repository;

use thiserror::Error;

use crate::store::StoreError;

pub use adapter::{AdapterError, ProviderAdapter};
pub use cache::ProviderCache;
pub use health::HealthController;
pub use probe::{HttpProbe, ProbeResult, ProviderProbe};
pub use repository::ProviderRepository;

/// Errors from provider management.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid provider: {0}")]
    Invalid(String),

    #[error("Provider not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
