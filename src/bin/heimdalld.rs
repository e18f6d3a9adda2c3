//! heimdalld — Heimdall daemon.
//!
//! Serves the [`Gatekeeper`](heimdall::Gatekeeper) over HTTP: the
//! generation endpoint plus the metrics surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use heimdall::server::config::{Config, Secrets};
use heimdall::server::{AppState, router};
use heimdall::{Gatekeeper, Heimdall};

/// Heimdall daemon — image-generation gatekeeper service.
#[derive(Parser)]
#[command(name = "heimdalld")]
#[command(version = heimdall::PKG_VERSION)]
#[command(about = "Heimdall image-generation gatekeeper daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;

    let gatekeeper = build_gatekeeper(&config, &secrets);

    // Parse address
    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| heimdall::HeimdallError::Configuration(format!("Invalid address: {e}")))?;

    info!(version = %heimdall::version_string(), %addr, "heimdalld starting");

    let gatekeeper = Arc::new(gatekeeper);

    // Hourly housekeeping: stale usage records hold no enforceable state.
    tokio::spawn({
        let gatekeeper = Arc::clone(&gatekeeper);
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                gatekeeper.prune_stale_usage().await;
            }
        }
    });

    let state = Arc::new(AppState {
        gatekeeper,
        metrics_secret: config.server.metrics_secret.clone(),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Build a [`Gatekeeper`] from configuration.
fn build_gatekeeper(config: &Config, secrets: &Secrets) -> Gatekeeper {
    let mut builder = Heimdall::builder()
        .max_in_flight(config.limits.max_in_flight)
        .usage_config(
            heimdall::UsageConfig::new()
                .min_interval(Duration::from_secs(config.limits.min_interval_secs))
                .daily_cap(heimdall::Tier::Free, config.limits.free_daily_cap)
                .daily_cap(heimdall::Tier::Paid, config.limits.paid_daily_cap),
        )
        .cache_config(
            heimdall::CacheConfig::new()
                .ttl(Duration::from_secs(config.cache.ttl_secs))
                .max_entries(config.cache.max_entries),
        )
        .retry_config(heimdall::RetryConfig::new().max_attempts(config.upstream.max_attempts))
        .timeout(Duration::from_secs(config.upstream.timeout_secs));

    if let Some(key) = secrets.upstream_api_key() {
        builder = builder.api_key(key);
    }
    if let Some(ref url) = config.upstream.base_url {
        builder = builder.base_url(url.clone());
    }
    if let Some(ref model) = config.upstream.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref size) = config.upstream.size {
        builder = builder.size(size.clone());
    }

    builder.build()
}
