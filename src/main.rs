//! Makeup Transfer Service
//!
//! Region-aware makeup style transfer with OpenVINO acceleration,
//! served over a REST (Axum) API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use glamshift::api::rest::{create_rest_router, AppState};
use glamshift::config::Config;
use glamshift::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting Makeup Transfer Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });

    info!("Configuration loaded:");
    info!("  Port: {}", config.server.port);
    info!("  Device: {}", config.inference.device);
    info!("  Native size: {}", config.transfer.native_size);
    info!("  Request timeout: {}s", config.server.request_timeout_secs);

    // Load models once for the whole process
    let pipeline = Arc::new(Pipeline::from_config(&config)?);

    let app_state = Arc::new(AppState {
        pipeline: pipeline.clone(),
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        start_time: Instant::now(),
    });

    let router = create_rest_router(app_state, config.server.body_limit_mb * 1024 * 1024);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("REST API listening on http://{}", addr);
    info!("Makeup Transfer Service is ready!");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, cleaning up...");
        })
        .await?;

    if let Some(pool) = pipeline.pool() {
        pool.shutdown();
    }

    info!("Goodbye!");
    Ok(())
}
