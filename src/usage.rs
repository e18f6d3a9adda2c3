//! Per-client usage enforcement: minimum interval and daily quota.
//!
//! The guard keeps an in-process table of [`UsageRecord`]s and optionally
//! defers to a durable [`UsageStore`](crate::store::UsageStore) so several
//! replicas can share one budget. The in-process path holds a single lock
//! across the read-check-update sequence, so two concurrent requests from
//! the same client cannot both observe "allowed" on the last unit of quota.
//!
//! Day keys are UTC calendar dates; `used_today` resets when the key rolls
//! over. A rejected request never consumes usage.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::UsageStore;
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Caller classification governing the daily quota.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Paid,
}

impl Tier {
    /// Parse a tier hint from a request header value. Anything other than
    /// an explicit `"paid"` is free.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("paid") => Tier::Paid,
            _ => Tier::Free,
        }
    }
}

/// Configuration for usage enforcement.
///
/// ```rust
/// # use heimdall::UsageConfig;
/// # use std::time::Duration;
/// let config = UsageConfig::new()
///     .min_interval(Duration::from_secs(10))
///     .daily_cap(heimdall::Tier::Free, 3);
/// ```
#[derive(Debug, Clone)]
pub struct UsageConfig {
    /// Minimum time between two accepted requests from one client,
    /// regardless of tier. Default: 10 seconds.
    pub min_interval: Duration,
    /// Daily cap for free-tier clients. Default: 3.
    pub free_daily_cap: u32,
    /// Daily cap for paid-tier clients. Default: 25.
    pub paid_daily_cap: u32,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(10),
            free_daily_cap: 3,
            paid_daily_cap: 25,
        }
    }
}

impl UsageConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum inter-request interval.
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set the daily cap for a tier.
    pub fn daily_cap(mut self, tier: Tier, cap: u32) -> Self {
        match tier {
            Tier::Free => self.free_daily_cap = cap,
            Tier::Paid => self.paid_daily_cap = cap,
        }
        self
    }

    /// Daily cap for the given tier.
    pub fn cap(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free_daily_cap,
            Tier::Paid => self.paid_daily_cap,
        }
    }
}

/// Per-client usage state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    /// UTC calendar date (`YYYY-MM-DD`) the counters belong to.
    pub day_key: String,
    /// Accepted requests so far today.
    pub used_today: u32,
    /// Epoch milliseconds of the last accepted request; 0 = never.
    pub last_request_at_ms: u64,
}

/// Epoch milliseconds from a monotonic base.
///
/// The wall-clock epoch is captured once at first use, then advanced with a
/// monotonic `Instant` so a system clock jump cannot re-open an interval
/// window.
pub fn current_time_ms() -> u64 {
    static BASE: OnceLock<(Instant, u64)> = OnceLock::new();
    let (start, epoch_ms) = BASE.get_or_init(|| {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), epoch_ms)
    });
    epoch_ms + start.elapsed().as_millis() as u64
}

/// Today's UTC day key (`YYYY-MM-DD`).
pub fn current_day_key() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Enforces the minimum interval and daily quota per client.
pub struct UsageGuard {
    config: UsageConfig,
    records: Mutex<HashMap<String, UsageRecord>>,
    store: Option<Arc<dyn UsageStore>>,
}

impl UsageGuard {
    /// Create a guard with in-process enforcement only.
    pub fn new(config: UsageConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a guard backed by a durable store.
    ///
    /// The store is consulted for tier overrides and the usage check; any
    /// store failure falls back to the in-process table.
    pub fn with_store(config: UsageConfig, store: Arc<dyn UsageStore>) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            store: Some(store),
        }
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    /// Check the client against interval and quota constraints, consuming
    /// one unit of usage on acceptance. Returns the effective tier.
    pub async fn check_and_consume(&self, client_key: &str, tier_hint: Tier) -> Result<Tier> {
        let tier = self.resolve_tier(client_key, tier_hint).await;

        if let Some(store) = &self.store {
            match store
                .check_and_increment(
                    client_key,
                    tier,
                    self.config.min_interval.as_millis() as u64,
                    self.config.cap(tier),
                )
                .await
            {
                Ok(decision) if decision.allowed => return Ok(tier),
                Ok(decision) => {
                    metrics::counter!(telemetry::USAGE_REJECTS_TOTAL, "reason" => "store")
                        .increment(1);
                    let message = decision
                        .message
                        .unwrap_or_else(|| "usage limit reached".to_string());
                    return Err(HeimdallError::UsageRejected(message));
                }
                Err(err) => {
                    tracing::debug!(error = %err, "usage store unreachable, using local table");
                }
            }
        }

        self.check_at(client_key, tier, current_time_ms(), &current_day_key())
            .await?;
        Ok(tier)
    }

    /// Deterministic core of the in-process check: evaluate (and on
    /// acceptance, consume) usage at an explicit time and day key.
    ///
    /// The single table lock is held across read, check, and update.
    pub async fn check_at(
        &self,
        client_key: &str,
        tier: Tier,
        now_ms: u64,
        day_key: &str,
    ) -> Result<()> {
        let mut records = self.records.lock().await;

        let record = records
            .entry(client_key.to_string())
            .or_insert_with(|| UsageRecord {
                day_key: day_key.to_string(),
                used_today: 0,
                last_request_at_ms: 0,
            });

        if record.day_key != day_key {
            record.day_key = day_key.to_string();
            record.used_today = 0;
        }

        let min_interval_ms = self.config.min_interval.as_millis() as u64;
        let elapsed = now_ms.saturating_sub(record.last_request_at_ms);
        if record.last_request_at_ms != 0 && elapsed < min_interval_ms {
            let wait_secs = (min_interval_ms - elapsed).div_ceil(1000);
            metrics::counter!(telemetry::USAGE_REJECTS_TOTAL, "reason" => "interval")
                .increment(1);
            return Err(HeimdallError::TooFrequent { wait_secs });
        }

        let cap = self.config.cap(tier);
        if record.used_today >= cap {
            metrics::counter!(telemetry::USAGE_REJECTS_TOTAL, "reason" => "daily_cap")
                .increment(1);
            return Err(HeimdallError::DailyLimitReached { cap });
        }

        record.last_request_at_ms = now_ms;
        record.used_today += 1;
        Ok(())
    }

    /// Current record for a client, if one exists.
    pub async fn usage_for(&self, client_key: &str) -> Option<UsageRecord> {
        self.records.lock().await.get(client_key).cloned()
    }

    /// Drop records whose day key is not `today` — stale entries hold no
    /// enforceable state once the interval window has long passed.
    pub async fn prune_stale(&self, today: &str) {
        self.records
            .lock()
            .await
            .retain(|_, record| record.day_key == today);
    }

    async fn resolve_tier(&self, client_key: &str, hint: Tier) -> Tier {
        if let Some(store) = &self.store {
            match store.tier_for(client_key).await {
                Ok(Some(Tier::Paid)) => return Tier::Paid,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "tier lookup failed, using header hint");
                }
            }
        }
        hint
    }
}
