//! Heimdall error types

use std::time::Duration;

/// Heimdall error types.
///
/// Every variant carries owned string payloads so the enum stays `Clone` —
/// a single in-flight generation outcome is fanned out verbatim to every
/// deduplicated follower.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HeimdallError {
    // Prompt validation
    #[error("prompt cannot be empty")]
    EmptyPrompt,

    #[error("prompt contains blocked content, please keep it family-friendly")]
    BlockedContent,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    // Usage enforcement
    #[error("please wait {wait_secs}s before generating again")]
    TooFrequent { wait_secs: u64 },

    #[error("daily generation limit reached ({cap})")]
    DailyLimitReached { cap: u32 },

    /// Rejection decided by the durable store, carrying its message.
    #[error("{0}")]
    UsageRejected(String),

    // Capacity
    #[error("generation is busy right now, please try again shortly")]
    Busy,

    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("upstream error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request to the image provider timed out")]
    Timeout,

    #[error("no image returned by the provider")]
    EmptyResponse,

    /// Upstream refused the prompt on content grounds. Distinct from
    /// [`BlockedContent`](Self::BlockedContent), which is our own filter.
    #[error("the image provider rejected this prompt: {reason}")]
    ContentRejected { reason: String },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HeimdallError {
    /// Whether this error is worth retrying against the upstream provider.
    ///
    /// Only provider rate limiting (HTTP 429) and attempt timeouts are
    /// transient; every other upstream status is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HeimdallError::RateLimited { .. } | HeimdallError::Timeout
        )
    }

    /// Provider-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HeimdallError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status code this error maps to at the inbound surface.
    pub fn status_code(&self) -> u16 {
        match self {
            HeimdallError::EmptyPrompt
            | HeimdallError::BlockedContent
            | HeimdallError::InvalidImage(_)
            | HeimdallError::ContentRejected { .. } => 400,
            HeimdallError::TooFrequent { .. }
            | HeimdallError::DailyLimitReached { .. }
            | HeimdallError::UsageRejected(_) => 429,
            HeimdallError::Busy => 503,
            _ => 500,
        }
    }

    /// Classify a non-2xx provider response.
    ///
    /// 429 becomes [`RateLimited`](Self::RateLimited) (carrying any
    /// `Retry-After` hint). Known content-policy phrases in the provider's
    /// error message are remapped to a friendlier 400-class rejection — a
    /// compatibility shim for providers that only signal moderation through
    /// message text.
    pub fn from_upstream(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        if status == 429 {
            return HeimdallError::RateLimited { retry_after };
        }
        let lower = message.to_lowercase();
        if lower.contains("safety system")
            || lower.contains("content policy")
            || lower.contains("daily generation limit")
        {
            return HeimdallError::ContentRejected { reason: message };
        }
        HeimdallError::Api { status, message }
    }
}

impl From<reqwest::Error> for HeimdallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HeimdallError::Timeout
        } else {
            HeimdallError::Http(err.to_string())
        }
    }
}

/// Result type alias for heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;
