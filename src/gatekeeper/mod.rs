//! The gatekeeper: end-to-end request flow.
//!
//! Composes policy, identity, usage, cache, dedup, admission, and the
//! upstream client into one request pipeline. The transition order is
//! fixed and cost-ordered: validation first (cheap, no side effects), then
//! usage enforcement (protects spend before anything else), then the cache
//! (cheapest path to a result), then dedup (avoids duplicate upstream
//! cost), then admission (protects upstream concurrency), then the call
//! itself.

mod builder;

pub use builder::{GatekeeperBuilder, Heimdall};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::admission::AdmissionController;
use crate::cache::{Fingerprint, GenerationCache};
use crate::identity::CallerInfo;
use crate::inflight::InflightCoordinator;
use crate::metrics::{GenerationMetrics, MetricsSink};
use crate::policy;
use crate::store::UsageStore;
use crate::upstream::{ImageBlob, UpstreamClient};
use crate::usage::UsageGuard;
use crate::{HeimdallError, Result};

/// One inbound generation (or photo-edit) request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Raw user prompt.
    pub prompt: String,
    /// Optional source image as a `data:image/...;base64,` URL. Presence
    /// makes this an edit request.
    pub source_image_data_url: Option<String>,
    /// Caller metadata from the transport layer.
    pub caller: CallerInfo,
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct GenerationReply {
    pub image: ImageBlob,
    /// Served from the generation cache.
    pub cached: bool,
    /// Served by joining an identical in-flight generation.
    pub deduped: bool,
    /// Produced by the photo-edit path.
    pub edited: bool,
    /// End-to-end latency observed by the gatekeeper.
    pub latency_ms: u64,
}

/// Request gatekeeper for a paid image-generation provider.
///
/// Construct via [`Heimdall::builder()`]. All state is owned by the
/// instance — tests build isolated gatekeepers, and nothing is stored in
/// globals.
pub struct Gatekeeper {
    upstream: UpstreamClient,
    usage: UsageGuard,
    cache: Arc<GenerationCache>,
    inflight: InflightCoordinator,
    admission: Arc<AdmissionController>,
    metrics: Arc<MetricsSink>,
    store: Option<Arc<dyn UsageStore>>,
}

impl Gatekeeper {
    pub(crate) fn new(
        upstream: UpstreamClient,
        usage: UsageGuard,
        cache: GenerationCache,
        admission: Arc<AdmissionController>,
        metrics: Arc<MetricsSink>,
        store: Option<Arc<dyn UsageStore>>,
    ) -> Self {
        Self {
            upstream,
            usage,
            cache: Arc::new(cache),
            inflight: InflightCoordinator::new(),
            admission,
            metrics,
            store,
        }
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: GenerationRequest) -> Result<GenerationReply> {
        let started = Instant::now();
        self.metrics.request_started();
        let kind = if request.source_image_data_url.is_some() {
            "edit"
        } else {
            "generate"
        };

        match self.handle_inner(request).await {
            Ok((image, cached, deduped, edited)) => {
                let latency = started.elapsed();
                self.metrics.record_latency(latency);
                self.metrics.request_succeeded(kind);
                Ok(GenerationReply {
                    image,
                    cached,
                    deduped,
                    edited,
                    latency_ms: latency.as_millis() as u64,
                })
            }
            Err(err) => {
                self.metrics.request_failed(kind);
                Err(err)
            }
        }
    }

    /// Current metrics snapshot, for the monitoring surface.
    pub fn metrics_snapshot(&self) -> GenerationMetrics {
        self.metrics.snapshot()
    }

    /// Start best-effort periodic metrics persistence.
    ///
    /// Returns `None` when no durable store is configured. The task is
    /// detached; dropping the handle does not stop it.
    pub fn start_metrics_flush(
        &self,
        interval: Duration,
    ) -> Option<tokio::task::JoinHandle<()>> {
        self.store.as_ref().map(|store| {
            Arc::clone(&self.metrics).spawn_flush_task(Arc::clone(store), interval)
        })
    }

    /// Drop usage records left over from previous days.
    ///
    /// The usage table grows with client cardinality; records from past
    /// days carry no enforceable state. Call periodically (the daemon runs
    /// this hourly).
    pub async fn prune_stale_usage(&self) {
        self.usage
            .prune_stale(&crate::usage::current_day_key())
            .await;
    }

    async fn handle_inner(
        &self,
        request: GenerationRequest,
    ) -> Result<(ImageBlob, bool, bool, bool)> {
        // Validating — cheap, pure, and before any quota is touched. A
        // blocked or empty prompt never counts against the daily cap.
        let prompt = policy::validate(&request.prompt)?;

        // Malformed uploads also fail before quota, admission, or upstream.
        let source = request
            .source_image_data_url
            .as_deref()
            .map(ImageBlob::from_data_url)
            .transpose()?;

        // Credentials are a deployment problem, not the caller's; fail
        // before consuming their quota.
        if !self.upstream.has_credentials() {
            return Err(HeimdallError::Configuration(
                "missing provider API key".to_string(),
            ));
        }

        let client_key = request.caller.client_key();
        self.usage
            .check_and_consume(&client_key, request.caller.tier_hint)
            .await?;

        // Edits combine a user photo with a prompt and are not expected to
        // repeat: no cache, no dedup, straight to admission.
        if let Some(source) = source {
            let _permit = match self.admission.try_enter() {
                Ok(permit) => permit,
                Err(err) => {
                    self.metrics.busy_reject();
                    return Err(err);
                }
            };
            let image = self.upstream.edit(&prompt, &source).await?;
            return Ok((image, false, false, true));
        }

        let fingerprint = Fingerprint::of(&prompt);

        if let Some(image) = self.cache.lookup(&fingerprint).await {
            self.metrics.cache_hit();
            return Ok((image, true, false, false));
        }
        self.metrics.cache_miss();

        let producer = {
            let upstream = self.upstream.clone();
            let cache = Arc::clone(&self.cache);
            let admission = Arc::clone(&self.admission);
            let prompt = prompt.clone();
            let fingerprint = fingerprint.clone();
            async move {
                // Only the producer consumes an admission slot; the permit
                // travels with this detached task and releases on
                // settlement, however the call ends.
                let _permit = admission.try_enter()?;
                let image = upstream.generate(&prompt).await?;
                cache.store(fingerprint, image.clone()).await;
                Ok(image)
            }
        };

        let (outcome, deduped) = self.inflight.await_or_start(fingerprint, producer).await;
        if deduped {
            self.metrics.deduped_hit();
        } else if matches!(outcome, Err(HeimdallError::Busy)) {
            self.metrics.busy_reject();
        }

        let image = outcome?;
        Ok((image, false, deduped, false))
    }
}
