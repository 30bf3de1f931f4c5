//! Firefuse - fusion of satellite fire detections into region risk profiles.
//!
//! # API Endpoints
//!
//! - `POST /pipeline` - Fuse posted detection batches and profile the posted regions
//! - `GET /config` - The active pipeline configuration
//! - `GET /health` - Health check
//!
//! # Environment
//!
//! - `FIREFUSE_PORT` - listening port (default 3000)
//! - `FIREFUSE_CONFIG` - path to the JSON pipeline configuration (required)

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use firefuse::PipelineConfig;
use firefuse::api::{AppState, router};

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("firefuse=info".parse()?))
        .init();

    let port: u16 = env::var("FIREFUSE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    // opinion weights have no default, so the configuration file is mandatory
    let config_path = env::var("FIREFUSE_CONFIG")
        .context("FIREFUSE_CONFIG must point to a JSON pipeline configuration")?;
    let config = PipelineConfig::from_json_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    info!(
        port,
        config = %config_path,
        spatial_threshold_km = config.spatial_threshold_km,
        temporal_threshold_hours = config.temporal_threshold_hours,
        "Starting firefuse server"
    );

    let state = AppState {
        config: Arc::new(config),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Firefuse is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
