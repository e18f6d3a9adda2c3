//! Image-generation provider client.
//!
//! Speaks the provider's images API over HTTP: text-to-image generations
//! and photo edits (multipart upload). Each attempt has a fixed timeout;
//! transient failures (provider 429, attempt timeout) are retried with
//! jittered exponential backoff, everything else is terminal. The client
//! keeps no state between calls.
//!
//! Images are opaque encoded blobs throughout — the only inspection ever
//! performed is magic-byte sniffing to reject malformed uploads before they
//! cost an admission slot or an upstream call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::policy::NormalizedPrompt;
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Default base URL for the image-generation provider.
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Default image model.
const DEFAULT_MODEL: &str = "gpt-image-1";

/// Default output size.
const DEFAULT_SIZE: &str = "1024x1024";

/// Default per-attempt timeout. Generations routinely take tens of seconds.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Upper bound of the random jitter added to each backoff delay.
const JITTER_MAX: Duration = Duration::from_millis(350);

// ============================================================================
// Image blobs
// ============================================================================

/// Accepted encoded image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// Identify a format from leading magic bytes.
    fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }
}

/// An opaque encoded image. Never re-encoded or transformed.
///
/// Bytes are shared, so cloning a blob (cache hits, dedup fan-out) is
/// cheap.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    format: ImageFormat,
    bytes: Arc<[u8]>,
}

impl ImageBlob {
    /// Wrap already-validated bytes.
    pub fn new(format: ImageFormat, bytes: Vec<u8>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }

    /// Parse and validate a `data:image/...;base64,` URL.
    ///
    /// The declared media type must be PNG or JPEG and the decoded bytes
    /// must carry the matching magic numbers; anything else fails fast with
    /// [`HeimdallError::InvalidImage`] — before any quota, admission slot,
    /// or upstream call is spent on it.
    pub fn from_data_url(data_url: &str) -> Result<Self> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| HeimdallError::InvalidImage("not a data URL".to_string()))?;
        let (media_type, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| HeimdallError::InvalidImage("missing base64 payload".to_string()))?;

        let declared = match media_type {
            "image/png" => ImageFormat::Png,
            "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
            other => {
                return Err(HeimdallError::InvalidImage(format!(
                    "unsupported media type: {other}"
                )));
            }
        };

        let bytes = BASE64
            .decode(payload)
            .map_err(|_| HeimdallError::InvalidImage("invalid base64 payload".to_string()))?;

        match ImageFormat::sniff(&bytes) {
            Some(actual) if actual == declared => Ok(Self::new(declared, bytes)),
            Some(_) => Err(HeimdallError::InvalidImage(
                "image bytes do not match the declared media type".to_string(),
            )),
            None => Err(HeimdallError::InvalidImage(
                "not a well-formed PNG or JPEG image".to_string(),
            )),
        }
    }

    /// Render as a `data:` URL for the response body.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime(),
            BASE64.encode(&self.bytes)
        )
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// ============================================================================
// Retry configuration
// ============================================================================

/// Configuration for retry behaviour on transient upstream errors.
///
/// Uses exponential backoff with optional jitter:
///
/// ```rust
/// # use heimdall::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(3)
///     .initial_delay(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
    /// Whether to add random jitter (up to 350ms) to delays. Default: true.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the base delay for a given attempt number (0-indexed).
    ///
    /// Exponential: `initial_delay * 2^attempt`, capped at `max_delay`.
    /// Does not include jitter — see [`effective_delay()`](Self::effective_delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Calculate the effective delay, respecting provider `Retry-After`
    /// hints and adding jitter when enabled.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt));
        if self.jitter {
            base + rand::thread_rng().gen_range(Duration::ZERO..=JITTER_MAX)
        } else {
            base
        }
    }
}

/// Execute an async operation with retry on transient errors.
///
/// Retries (per [`HeimdallError::is_transient()`]) up to
/// `config.max_attempts`, honouring `Retry-After` hints. Permanent errors
/// return immediately; after exhaustion the LAST error is surfaced, never a
/// synthesized one.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                    .increment(1);
                if attempt + 1 < config.max_attempts {
                    let delay = config.effective_delay(attempt, e.retry_after());
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e), // permanent error, no retry
        }
    }
    Err(last_err
        .unwrap_or_else(|| HeimdallError::Internal("retry loop made no attempts".to_string())))
}

// ============================================================================
// Client
// ============================================================================

/// Client for the image-generation provider.
#[derive(Clone)]
pub struct UpstreamClient {
    api_key: String,
    http: Client,
    base_url: String,
    model: String,
    size: String,
    retry: RetryConfig,
}

impl UpstreamClient {
    /// Create a client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            api_key: api_key.into(),
            http,
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
            size: DEFAULT_SIZE.to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Set the image model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output size.
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Set the retry configuration.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        self
    }

    /// Whether an API key is configured.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Generate an image from a prompt.
    pub async fn generate(&self, prompt: &NormalizedPrompt) -> Result<ImageBlob> {
        self.ensure_credentials()?;
        with_retry(&self.retry, "generate", || self.generate_once(prompt)).await
    }

    /// Edit a source image according to a prompt.
    ///
    /// The source must already be a validated [`ImageBlob`]; malformed
    /// uploads never reach this point.
    pub async fn edit(&self, prompt: &NormalizedPrompt, source: &ImageBlob) -> Result<ImageBlob> {
        self.ensure_credentials()?;
        with_retry(&self.retry, "edit", || self.edit_once(prompt, source)).await
    }

    fn ensure_credentials(&self) -> Result<()> {
        if self.has_credentials() {
            Ok(())
        } else {
            Err(HeimdallError::Configuration(
                "missing provider API key".to_string(),
            ))
        }
    }

    async fn generate_once(&self, prompt: &NormalizedPrompt) -> Result<ImageBlob> {
        let url = format!("{}/v1/images/generations", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&GenerationsRequest {
                model: &self.model,
                prompt: prompt.as_str(),
                size: &self.size,
            })
            .send()
            .await?;

        Self::image_from_response(response).await
    }

    async fn edit_once(&self, prompt: &NormalizedPrompt, source: &ImageBlob) -> Result<ImageBlob> {
        let url = format!("{}/v1/images/edits", self.base_url);

        let part = reqwest::multipart::Part::bytes(source.bytes().to_vec())
            .file_name(format!("source.{}", source.format().extension()))
            .mime_str(source.format().mime())
            .map_err(|e| HeimdallError::Internal(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("model", self.model.clone())
            .text("prompt", prompt.as_str().to_string())
            .text("size", self.size.clone());

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        Self::image_from_response(response).await
    }

    /// Turn a provider response into an image blob or a classified error.
    async fn image_from_response(response: reqwest::Response) -> Result<ImageBlob> {
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => format!("provider returned status {}", status.as_u16()),
            };
            return Err(HeimdallError::from_upstream(
                status.as_u16(),
                message,
                retry_after,
            ));
        }

        let body: ImagesResponse = response.json().await?;
        let payload = body
            .data
            .into_iter()
            .next()
            .ok_or(HeimdallError::EmptyResponse)?;
        let bytes = BASE64
            .decode(payload.b64_json.as_bytes())
            .map_err(|_| HeimdallError::Http("undecodable image payload".to_string()))?;
        // Providers return PNG unless asked otherwise; trust the sniff over
        // any assumption.
        let format = ImageFormat::sniff(&bytes).unwrap_or(ImageFormat::Png);
        Ok(ImageBlob::new(format, bytes))
    }
}

#[derive(Serialize)]
struct GenerationsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImagePayload>,
}

#[derive(Deserialize)]
struct ImagePayload {
    b64_json: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}
