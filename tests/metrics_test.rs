//! Tests for metrics: the owned snapshot, the `metrics` facade emission,
//! and best-effort periodic persistence.
//!
//! Facade assertions use `metrics_util::debugging::DebuggingRecorder` to
//! capture emitted metrics without a real exporter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use heimdall::cache::{CacheConfig, Fingerprint, GenerationCache};
use heimdall::metrics::MetricsSink;
use heimdall::store::{StoreDecision, UsageStore};
use heimdall::upstream::{ImageBlob, ImageFormat};
use heimdall::{
    GenerationMetrics, HeimdallError, Result, Tier, UsageConfig, UsageGuard, policy, telemetry,
};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn png_blob() -> ImageBlob {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.extend_from_slice(&[0; 16]);
    ImageBlob::new(ImageFormat::Png, bytes)
}

// ============================================================================
// Facade emission
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_lookups_emit_hit_and_miss_counters() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let cache = GenerationCache::new(&CacheConfig::default());
                let fp = Fingerprint::of(&policy::validate("a red fox").unwrap());

                assert!(cache.lookup(&fp).await.is_none()); // miss
                cache.store(fp.clone(), png_blob()).await;
                assert!(cache.lookup(&fp).await.is_some()); // hit
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn usage_rejections_emit_labelled_counters() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let guard = UsageGuard::new(UsageConfig::default());
                guard.check_at("client-a", Tier::Free, 1_000, "2026-08-06").await.unwrap();
                // Inside the interval: rejected.
                let _ = guard.check_at("client-a", Tier::Free, 2_000, "2026-08-06").await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::USAGE_REJECTS_TOTAL), 1);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let cache = GenerationCache::new(&CacheConfig::default());
    let fp = Fingerprint::of(&policy::validate("a red fox").unwrap());
    let _ = cache.lookup(&fp).await;
}

// ============================================================================
// Owned snapshot
// ============================================================================

#[test]
fn snapshot_reflects_recorded_values() {
    let sink = MetricsSink::new();
    sink.request_started();
    sink.cache_miss();
    sink.in_flight_entered();
    sink.record_latency(Duration::from_millis(1234));
    sink.request_succeeded("generate");

    let snapshot = sink.snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.total_success, 1);
    assert_eq!(snapshot.cache_misses, 1);
    assert_eq!(snapshot.in_flight_count, 1);
    assert_eq!(snapshot.last_latency_ms, Some(1234));

    sink.in_flight_exited();
    assert_eq!(sink.snapshot().in_flight_count, 0);
}

#[test]
fn latency_is_absent_until_first_recording() {
    let sink = MetricsSink::new();
    assert_eq!(sink.snapshot().last_latency_ms, None);
}

#[test]
fn snapshot_serializes_with_wire_field_names() {
    let sink = MetricsSink::new();
    sink.request_started();
    let json = serde_json::to_value(sink.snapshot()).unwrap();
    assert_eq!(json["totalRequests"], 1);
    assert!(json.get("inFlightCount").is_some());
    assert!(json.get("lastLatencyMs").is_some());
}

// ============================================================================
// Periodic persistence
// ============================================================================

struct CountingStore {
    appends: AtomicU32,
    fail: bool,
}

#[async_trait]
impl UsageStore for CountingStore {
    async fn tier_for(&self, _client_key: &str) -> Result<Option<Tier>> {
        Ok(None)
    }

    async fn check_and_increment(
        &self,
        _client_key: &str,
        _tier: Tier,
        _min_interval_ms: u64,
        _daily_cap: u32,
    ) -> Result<StoreDecision> {
        Ok(StoreDecision { allowed: true, message: None })
    }

    async fn append_metrics(&self, _snapshot: &GenerationMetrics) -> Result<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HeimdallError::Http("store down".into()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn flush_task_appends_snapshots_periodically() {
    let sink = Arc::new(MetricsSink::new());
    let store = Arc::new(CountingStore { appends: AtomicU32::new(0), fail: false });

    let handle =
        Arc::clone(&sink).spawn_flush_task(Arc::clone(&store) as _, Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.abort();

    assert!(store.appends.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn flush_failures_are_swallowed() {
    let sink = Arc::new(MetricsSink::new());
    let store = Arc::new(CountingStore { appends: AtomicU32::new(0), fail: true });

    let handle =
        Arc::clone(&sink).spawn_flush_task(Arc::clone(&store) as _, Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.abort();

    // It kept trying despite every append failing.
    assert!(store.appends.load(Ordering::SeqCst) >= 2);
}
