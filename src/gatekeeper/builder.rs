//! Builder for configuring gatekeeper instances

use std::sync::Arc;
use std::time::Duration;

use crate::admission::{AdmissionController, DEFAULT_MAX_IN_FLIGHT};
use crate::cache::{CacheConfig, GenerationCache};
use crate::metrics::MetricsSink;
use crate::store::UsageStore;
use crate::upstream::{RetryConfig, UpstreamClient};
use crate::usage::{UsageConfig, UsageGuard};

use super::Gatekeeper;

/// Main entry point for creating gatekeeper instances.
pub struct Heimdall;

impl Heimdall {
    /// Create a new builder for configuring the gatekeeper.
    pub fn builder() -> GatekeeperBuilder {
        GatekeeperBuilder::new()
    }
}

/// Builder for configuring gatekeeper instances.
pub struct GatekeeperBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    size: Option<String>,
    timeout: Option<Duration>,
    upstream: Option<UpstreamClient>,
    usage: UsageConfig,
    cache: CacheConfig,
    retry: RetryConfig,
    max_in_flight: usize,
    store: Option<Arc<dyn UsageStore>>,
}

impl GatekeeperBuilder {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: None,
            size: None,
            timeout: None,
            upstream: None,
            usage: UsageConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            store: None,
        }
    }

    /// Set the provider API key.
    ///
    /// A gatekeeper built without one still serves — every generation
    /// request fails with a configuration error before consuming quota.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the provider base URL (staging, wiremock).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the image model requested from the provider.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the output size requested from the provider.
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Set the per-attempt upstream timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Inject a fully configured upstream client, ignoring the key/url/
    /// model/size/timeout settings above.
    pub fn upstream_client(mut self, client: UpstreamClient) -> Self {
        self.upstream = Some(client);
        self
    }

    /// Set usage enforcement parameters.
    pub fn usage_config(mut self, config: UsageConfig) -> Self {
        self.usage = config;
        self
    }

    /// Set generation cache parameters.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set upstream retry parameters.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Cap concurrently in-flight upstream calls (system-wide).
    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    /// Attach a durable store for multi-instance usage enforcement and
    /// metrics persistence.
    pub fn store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the gatekeeper.
    pub fn build(self) -> Gatekeeper {
        let upstream = self.upstream.unwrap_or_else(|| {
            let mut client = match self.base_url {
                Some(url) => UpstreamClient::with_base_url(self.api_key.unwrap_or_default(), url),
                None => UpstreamClient::new(self.api_key.unwrap_or_default()),
            };
            if let Some(model) = self.model {
                client = client.model(model);
            }
            if let Some(size) = self.size {
                client = client.size(size);
            }
            if let Some(timeout) = self.timeout {
                client = client.timeout(timeout);
            }
            client.retry_config(self.retry)
        });

        let usage = match &self.store {
            Some(store) => UsageGuard::with_store(self.usage, Arc::clone(store)),
            None => UsageGuard::new(self.usage),
        };

        let metrics = Arc::new(MetricsSink::new());
        let admission = Arc::new(AdmissionController::new(
            self.max_in_flight,
            Arc::clone(&metrics),
        ));

        Gatekeeper::new(
            upstream,
            usage,
            GenerationCache::new(&self.cache),
            admission,
            metrics,
            self.store,
        )
    }
}

impl Default for GatekeeperBuilder {
    fn default() -> Self {
        Self::new()
    }
}
