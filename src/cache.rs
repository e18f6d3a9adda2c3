//! Generation cache: fingerprinting and TTL'd image storage.
//!
//! The cache maps a content-addressed fingerprint of the normalized prompt
//! to a previously produced image. Entries live for a fixed TTL and the
//! cache is LRU-bounded — prompt traffic has unbounded cardinality, so an
//! uncapped map would grow without limit in a long-running process.
//!
//! Fingerprints are SHA-256 rather than a per-process hasher so the same
//! key scheme works against a shared backend (several replicas, one cache)
//! without change.

use std::time::Duration;

use moka::future::Cache;
use sha2::{Digest, Sha256};

use crate::policy::NormalizedPrompt;
use crate::telemetry;
use crate::upstream::ImageBlob;

/// Content-addressed key for cache and in-flight dedup: lowercase hex
/// SHA-256 of the normalized prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a normalized prompt.
    pub fn of(prompt: &NormalizedPrompt) -> Self {
        let digest = Sha256::digest(prompt.as_str().as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        Fingerprint(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration for the generation cache.
///
/// ```rust
/// # use heimdall::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(180))
///     .max_entries(1024);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for cached generations. Default: 3 minutes.
    pub ttl: Duration,
    /// Maximum number of cached entries. Default: 1,024.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(180),
            max_entries: 1024,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live for cached generations.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// TTL + LRU cache of produced images, keyed by fingerprint.
pub struct GenerationCache {
    cache: Cache<Fingerprint, ImageBlob>,
}

impl GenerationCache {
    /// Create a cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self { cache }
    }

    /// Look up a cached image. Expired entries behave as absent.
    ///
    /// Emits cache hit/miss metrics.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<ImageBlob> {
        match self.cache.get(fingerprint).await {
            Some(blob) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Some(blob)
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Store a produced image, overwriting any existing entry for the same
    /// fingerprint.
    pub async fn store(&self, fingerprint: Fingerprint, blob: ImageBlob) {
        self.cache.insert(fingerprint, blob).await;
    }

    /// Number of live entries (post-housekeeping).
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
