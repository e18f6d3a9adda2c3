//! Generation metrics: process-wide counters and best-effort persistence.
//!
//! [`MetricsSink`] is the owned, injectable counterpart of the `metrics`
//! facade: atomics that the monitoring endpoint can snapshot directly,
//! with each mutation mirrored to the facade constants in
//! [`telemetry`](crate::telemetry) for whatever recorder the host process
//! installed. Counters are monotonic; only the in-flight gauge moves both
//! ways.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::UsageStore;
use crate::telemetry;

/// Point-in-time copy of the gatekeeper's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetrics {
    pub in_flight_count: i64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub deduped_hits: u64,
    pub busy_rejects: u64,
    pub total_requests: u64,
    pub total_success: u64,
    pub total_errors: u64,
    pub last_latency_ms: Option<u64>,
}

/// Process-wide metrics accumulator. All methods are non-blocking.
#[derive(Default, Debug)]
pub struct MetricsSink {
    in_flight: AtomicI64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    deduped_hits: AtomicU64,
    busy_rejects: AtomicU64,
    total_requests: AtomicU64,
    total_success: AtomicU64,
    total_errors: AtomicU64,
    // (has_latency, latency_ms) — no Option in atomics
    latency_recorded: AtomicBool,
    last_latency_ms: AtomicU64,
    flush_outstanding: AtomicBool,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_started(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_succeeded(&self, kind: &'static str) {
        self.total_success.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => "ok", "kind" => kind)
            .increment(1);
    }

    pub fn request_failed(&self, kind: &'static str) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => "error", "kind" => kind)
            .increment(1);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deduped_hit(&self) {
        self.deduped_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::DEDUPED_HITS_TOTAL).increment(1);
    }

    pub fn busy_reject(&self) {
        self.busy_rejects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::BUSY_REJECTS_TOTAL).increment(1);
    }

    pub fn in_flight_entered(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!(telemetry::IN_FLIGHT).increment(1.0);
    }

    pub fn in_flight_exited(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!(telemetry::IN_FLIGHT).decrement(1.0);
    }

    pub fn record_latency(&self, latency: Duration) {
        self.last_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
        self.latency_recorded.store(true, Ordering::Relaxed);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS).record(latency.as_secs_f64());
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> GenerationMetrics {
        GenerationMetrics {
            in_flight_count: self.in_flight.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            deduped_hits: self.deduped_hits.load(Ordering::Relaxed),
            busy_rejects: self.busy_rejects.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_success: self.total_success.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            last_latency_ms: self
                .latency_recorded
                .load(Ordering::Relaxed)
                .then(|| self.last_latency_ms.load(Ordering::Relaxed)),
        }
    }

    /// Spawn a detached task that appends a snapshot to `store` every
    /// `interval`, skipping a tick when the previous flush is still
    /// outstanding. Flush failures are logged at debug and otherwise
    /// ignored — telemetry must never affect request handling.
    pub fn spawn_flush_task(
        self: Arc<Self>,
        store: Arc<dyn UsageStore>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let sink = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if sink
                    .flush_outstanding
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                if let Err(err) = store.append_metrics(&sink.snapshot()).await {
                    tracing::debug!(error = %err, "metrics flush failed");
                }
                sink.flush_outstanding.store(false, Ordering::Release);
            }
        })
    }
}
