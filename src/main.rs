//! resilience-core demo service
//!
//! Builds the shared primitives once and exposes their health over HTTP.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                  resilience-core                      │
//!                      │                                                       │
//!   GET /health/*      │  ┌──────────┐     ┌──────────────────────────────┐   │
//!   ───────────────────┼─▶│   http   │────▶│ HealthRegistry (probes run   │   │
//!                      │  │  router  │     │ concurrently, 5s deadline)   │   │
//!   /v1/*              │  │          │     └──────────────────────────────┘   │
//!   ───────────────────┼─▶│ rate     │────▶ TieredRateLimiter ──429──▶ client │
//!                      │  │ limit mw │────▶ BreakerRegistry snapshots/reset   │
//!                      │  └──────────┘                                        │
//!                      │                                                       │
//!                      │  ┌─────────────────────────────────────────────────┐ │
//!                      │  │ Shared primitives (built once, injected)        │ │
//!                      │  │  CacheStore · BreakerRegistry · RetryPolicy     │ │
//!                      │  │  TieredRateLimiter · HealthRegistry             │ │
//!                      │  └─────────────────────────────────────────────────┘ │
//!                      │  ┌──────────┐ ┌──────────────┐ ┌──────────────────┐  │
//!                      │  │  config  │ │observability │ │    lifecycle     │  │
//!                      │  │ + reload │ │ logs/metrics │ │ startup/shutdown │  │
//!                      │  └──────────┘ └──────────────┘ └──────────────────┘  │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use resilience_core::config::watcher::RateLimitWatcher;
use resilience_core::config::{load_config, validation::validate_config, ConfigError};
use resilience_core::http::{router, serve};
use resilience_core::lifecycle::{shutdown_signal, Services, Shutdown};
use resilience_core::observability::{logging, metrics};
use resilience_core::ResilienceConfig;

#[derive(Parser)]
#[command(name = "resilience-core")]
#[command(about = "Resilience and caching primitives demo service", long_about = None)]
struct Args {
    /// TOML config file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let config = ResilienceConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilience-core starting");
    tracing::info!(
        config = ?args.config,
        bind_address = %config.server.bind_address,
        request_timeout_secs = config.server.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = Services::from_config(&config)?;
    let shutdown = Shutdown::new();
    services.spawn_background(&config, &shutdown);

    // Hot reload of the rate-limit tiers; the watcher handle must outlive the server
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = RateLimitWatcher::new(path, config.rate_limit.clone());
            let limiter = services.limiter.clone();
            let mut stop = shutdown.subscribe();
            let reload_task = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(rate_limit) => {
                                if let Err(e) = limiter.reload(&rate_limit) {
                                    tracing::error!(error = %e, "Rejected rate-limit reload");
                                }
                            }
                            None => break,
                        },
                        _ = stop.recv() => break,
                    }
                }
            });
            shutdown.track("rate-limit-reload", reload_task);
            match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let app = router(
        services.app_state(),
        Duration::from_secs(config.server.request_timeout_secs),
    );
    serve(listener, app, shutdown_signal()).await?;

    shutdown.trigger();
    let stuck = shutdown.drain(Duration::from_secs(5)).await;
    if !stuck.is_empty() {
        tracing::warn!(tasks = ?stuck, "Aborted background tasks at shutdown");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
