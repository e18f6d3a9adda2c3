//! Heimdall - request gatekeeper for paid image-generation APIs
//!
//! This crate sits between a public generation endpoint and a paid, slow,
//! rate-limited upstream image provider. It validates and rewrites prompts,
//! enforces per-client intervals and daily quotas, caches results, joins
//! concurrent identical requests into a single upstream call, caps upstream
//! concurrency with fail-fast admission, and retries transient provider
//! failures with jittered exponential backoff.
//!
//! # Example
//!
//! ```rust,no_run
//! use heimdall::{Heimdall, GenerationRequest, CallerInfo};
//!
//! #[tokio::main]
//! async fn main() -> heimdall::Result<()> {
//!     let gatekeeper = Heimdall::builder()
//!         .api_key("sk-your-key")
//!         .max_in_flight(8)
//!         .build();
//!
//!     let reply = gatekeeper.handle(GenerationRequest {
//!         prompt: "sunset over mountains".into(),
//!         source_image_data_url: None,
//!         caller: CallerInfo::default(),
//!     }).await?;
//!
//!     println!("cached: {}, {} ms", reply.cached, reply.latency_ms);
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod cache;
pub mod error;
pub mod gatekeeper;
pub mod identity;
pub mod inflight;
pub mod metrics;
pub mod policy;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod telemetry;
pub mod upstream;
pub mod usage;
mod version;

// Re-export main types at crate root
pub use error::{HeimdallError, Result};
pub use gatekeeper::{Gatekeeper, GatekeeperBuilder, GenerationReply, GenerationRequest, Heimdall};
pub use version::{PKG_VERSION, version_string};

// Re-export component types
pub use admission::{AdmissionController, AdmissionPermit, DEFAULT_MAX_IN_FLIGHT};
pub use cache::{CacheConfig, Fingerprint, GenerationCache};
pub use identity::{ANONYMOUS_CLIENT, CallerInfo};
pub use inflight::InflightCoordinator;
pub use metrics::{GenerationMetrics, MetricsSink};
pub use policy::NormalizedPrompt;
pub use store::{StoreDecision, UsageStore};
pub use upstream::{ImageBlob, ImageFormat, RetryConfig, UpstreamClient};
pub use usage::{Tier, UsageConfig, UsageGuard, UsageRecord};
