//! Optional durable backing store.
//!
//! [`UsageStore`] is the seam for multi-instance correctness: a single
//! heimdall process enforces quotas from its in-process table, but several
//! replicas behind a balancer need a shared source of truth. Implementations
//! are thin clients over whatever the deployment has (a relational store
//! with an atomic check-and-increment procedure, a key-value store with
//! CAS) — the core never couples to one.
//!
//! The store is strictly optional. Every method may fail, and every caller
//! falls back to in-process enforcement (usage) or drops the write
//! (metrics). A missing or unreachable store must never block a request.

use async_trait::async_trait;

use crate::Result;
use crate::metrics::GenerationMetrics;
use crate::usage::Tier;

/// Outcome of a store-side usage check.
#[derive(Debug, Clone)]
pub struct StoreDecision {
    pub allowed: bool,
    /// Human-readable rejection message when `allowed` is false.
    pub message: Option<String>,
}

/// Durable backing store for usage records and metrics snapshots.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Read the stored tier for a client, if the store knows one.
    ///
    /// A stored `Paid` tier overrides the caller's tier hint; `None` or an
    /// error leaves the hint in effect.
    async fn tier_for(&self, client_key: &str) -> Result<Option<Tier>>;

    /// Atomically check interval and daily-cap constraints for a client and
    /// consume one unit of usage if allowed.
    ///
    /// On error the caller falls back to in-process enforcement.
    async fn check_and_increment(
        &self,
        client_key: &str,
        tier: Tier,
        min_interval_ms: u64,
        daily_cap: u32,
    ) -> Result<StoreDecision>;

    /// Append a metrics snapshot. Best-effort; failures are swallowed by
    /// the caller.
    async fn append_metrics(&self, snapshot: &GenerationMetrics) -> Result<()>;
}
