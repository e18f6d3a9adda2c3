//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! gauges are bare nouns, histograms use meaningful units.
//!
//! # Common labels
//!
//! - `status` — outcome: "ok" or "error"
//! - `reason` — rejection reason for usage rejects: "interval" or "daily_cap"
//! - `kind` — request kind: "generate" or "edit"

/// Total requests entering the gatekeeper.
///
/// Labels: `status` ("ok" | "error"), `kind` ("generate" | "edit").
pub const REQUESTS_TOTAL: &str = "heimdall_requests_total";

/// End-to-end request duration in seconds.
pub const REQUEST_DURATION_SECONDS: &str = "heimdall_request_duration_seconds";

/// Total retry attempts against the upstream provider (not counting the
/// initial request).
pub const RETRIES_TOTAL: &str = "heimdall_retries_total";

/// Total generation cache hits.
pub const CACHE_HITS_TOTAL: &str = "heimdall_cache_hits_total";

/// Total generation cache misses.
pub const CACHE_MISSES_TOTAL: &str = "heimdall_cache_misses_total";

/// Total requests satisfied by joining an identical in-flight generation.
pub const DEDUPED_HITS_TOTAL: &str = "heimdall_deduped_hits_total";

/// Total fail-fast rejections from the admission controller.
pub const BUSY_REJECTS_TOTAL: &str = "heimdall_busy_rejects_total";

/// Total usage-guard rejections.
///
/// Labels: `reason` ("interval" | "daily_cap" | "store").
pub const USAGE_REJECTS_TOTAL: &str = "heimdall_usage_rejects_total";

/// Upstream calls currently in flight (gauge, bounded by the admission cap).
pub const IN_FLIGHT: &str = "heimdall_in_flight";
