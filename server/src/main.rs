//! CropCare Inference Server
//!
//! HTTP API serving leaf disease predictions to the CropCare front end.
//! Loads the model once at startup and refuses to start without it.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cropcare::backend::backend_name;
use cropcare::utils::logging::{init_logging, LogConfig};
use cropcare::{PredictionService, ServiceConfig};
use tracing::{info, warn};

use crate::state::{AppState, ServerSettings};

/// CropCare Inference Server
#[derive(Parser, Debug)]
#[command(name = "cropcare-server")]
#[command(version)]
#[command(about = "HTTP API for CropCare leaf disease inference")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "CROPCARE_CONFIG", default_value = "config/cropcare.toml")]
    config: PathBuf,

    /// Host to bind to, overrides `server.host`
    #[arg(long, env = "CROPCARE_HOST")]
    host: Option<String>,

    /// Port to listen on, overrides `server.port`
    #[arg(short, long, env = "CROPCARE_PORT")]
    port: Option<u16>,

    /// Classifier artifact, overrides `model.path`
    #[arg(short, long, env = "CROPCARE_MODEL")]
    model: Option<PathBuf>,

    /// Class index JSON, overrides `labels.class_index_path`
    #[arg(long, env = "CROPCARE_CLASS_INDEX")]
    class_index: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Build configuration
    let mut config = ServiceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let mut settings = ServerSettings::load(&cli.config)
        .with_context(|| format!("loading [server] from {}", cli.config.display()))?;

    if let Some(model) = cli.model {
        config.model.path = model;
    }
    if let Some(class_index) = cli.class_index {
        config.labels.class_index_path = class_index;
    }
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }

    // Initialize logging
    let log_config = config
        .logging
        .log_config(LogConfig::production(), cli.verbose);
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("CropCare Inference Server v{}", cropcare::VERSION);
    if !cli.config.exists() {
        warn!("Config file {:?} not found, using defaults", cli.config);
    }
    info!("Configuration:");
    info!("  Model:       {:?}", config.model.path);
    info!("  Class index: {:?}", config.labels.class_index_path);
    info!("  Image size:  {}", config.preprocess.image_size);
    info!("  Backend:     {}", backend_name());
    info!("  Timeout:     {} ms", settings.request_timeout_ms);
    info!("  Upload cap:  {} bytes", settings.max_upload_bytes);

    // Load the model; there is no degraded mode without it
    let service = PredictionService::from_config(&config).context("refusing to start")?;
    info!("Model:  {}", service.runtime().describe());
    info!("Labels: {}", service.class_map().len());
    for (crop, ids) in service.crop_groups().iter() {
        info!("Crop group {}: {:?}", crop, ids);
    }

    // Create shared state
    let state = Arc::new(AppState::new(service, settings.clone()));
    let app = routes::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", settings.host, settings.port))?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
