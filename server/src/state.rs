//! Application state for the CropCare server
//!
//! Holds the loaded prediction service, the server settings and the permit pool
//! that bounds concurrent predictions.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cropcare::config::load_toml_config;
use cropcare::{PredictionService, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

/// `[server]` table of the configuration file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on one prediction, including time spent queued for a permit
    pub request_timeout_ms: u64,
    pub max_upload_bytes: usize,
    /// 0 means one prediction per available CPU
    pub max_concurrent_predictions: usize,
    /// Allowed browser origins; empty allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2526,
            request_timeout_ms: 10_000,
            max_upload_bytes: 10 * 1024 * 1024,
            max_concurrent_predictions: 0,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerFile {
    server: ServerSettings,
}

impl ServerSettings {
    /// Read the `[server]` table; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file: ServerFile = load_toml_config(path)?;
        Ok(file.server)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn prediction_permits(&self) -> usize {
        if self.max_concurrent_predictions > 0 {
            return self.max_concurrent_predictions;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Shared application state
pub struct AppState {
    pub service: PredictionService,
    pub settings: ServerSettings,
    /// Bounds how many predictions occupy the blocking pool at once
    pub permits: Arc<Semaphore>,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: PredictionService, settings: ServerSettings) -> Self {
        let permits = settings.prediction_permits();
        debug!("Allowing {} concurrent predictions", permits);

        Self {
            service,
            settings,
            permits: Arc::new(Semaphore::new(permits)),
            started_at: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
