//! Process-wide cache of the enabled provider list.
//!
//! Entries are keyed by a monotonic generation. Readers note the generation
//! before fetching from the store and the fetched list is only kept if no
//! writer bumped it in the meantime, so a slow fetch can't resurrect state
//! that an invalidation already dropped. A TTL bounds staleness from writers
//! in other processes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::models::AiProvider;

/// Default TTL for the cached provider list.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    generation: u64,
    providers: Vec<AiProvider>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache of enabled providers, sorted by priority.
pub struct ProviderCache {
    generation: AtomicU64,
    entry: RwLock<Option<CacheEntry>>,
    ttl: Duration,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            generation: AtomicU64::new(0),
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// Current generation; capture it before fetching.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Active providers at `now`, if a fresh entry for the current generation exists.
    pub fn get_active(&self, now: DateTime<Utc>) -> Option<Vec<AiProvider>> {
        let current = self.generation();
        self.entry.read().ok().and_then(|guard| {
            guard
                .as_ref()
                .filter(|e| e.generation == current && !e.is_expired())
                .map(|e| {
                    e.providers
                        .iter()
                        .filter(|p| p.is_active(now))
                        .cloned()
                        .collect()
                })
        })
    }

    /// Store a list fetched while `generation` was current.
    ///
    /// Returns false (and stores nothing) if the cache was invalidated since.
    pub fn put(&self, generation: u64, providers: Vec<AiProvider>) -> bool {
        let Ok(mut guard) = self.entry.write() else {
            return false;
        };
        if self.generation() != generation {
            return false;
        }
        *guard = Some(CacheEntry {
            generation,
            providers,
            expires_at: Instant::now() + self.ttl,
        });
        true
    }

    /// Drop the cached list; the next read refetches.
    pub fn invalidate(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut guard) = self.entry.write() {
            *guard = None;
        }
        next
    }
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCache")
            .field("generation", &self.generation())
            .field("ttl", &self.ttl)
            .finish()
    }
}
