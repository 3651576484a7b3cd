//! Engine configuration
//!
//! All operator-tunable parameters live here, loaded from a TOML file and
//! validated at startup.
//!
//! ## Loading Order
//!
//! 1. `EPIWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `epiwatch.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded struct is passed explicitly to the components that need it;
//! there is no process-global configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an alternate config path.
const CONFIG_ENV_VAR: &str = "EPIWATCH_CONFIG";

/// Default config filename in the working directory.
const CONFIG_FILE: &str = "epiwatch.toml";

/// Clustering, snapshot and forecast parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Spatial band of the composite clustering metric, in meters.
    pub eps_meters: f64,
    /// DBSCAN core-point threshold.
    pub min_samples: usize,
    /// Temporal-split threshold in days.
    pub max_time_gap_days: i64,
    /// Snapshot window width in days.
    pub timedelta_days: i64,
    /// Future windows emitted per cluster.
    pub forecast_steps: usize,
    /// Minimum prepared observations before a model fit is attempted.
    pub min_observations: usize,
    /// Runs kept by the retention pass.
    pub retention_runs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eps_meters: 5000.0,
            min_samples: 3,
            max_time_gap_days: 14,
            timedelta_days: 1,
            forecast_steps: 1,
            min_observations: 5,
            retention_runs: 10,
        }
    }
}

/// Server and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address.
    pub addr: String,
    /// Directory holding the run store.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Remote collaborator endpoints. When unset, the deterministic local
/// implementations are wired instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub inference_url: Option<String>,
    pub embedding_url: Option<String>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub collaborators: CollaboratorConfig,
}

impl AppConfig {
    /// Load following the documented order. Parse failures fall back to
    /// defaults with a warning rather than refusing to start.
    pub fn load() -> Self {
        let explicit = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        let path = explicit.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        if path.exists() {
            match Self::from_path(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Config unreadable, using defaults");
                }
            }
        }
        Self::default()
    }

    /// Parse a specific TOML file.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.eps_meters <= 0.0 || !self.engine.eps_meters.is_finite() {
            anyhow::bail!("eps_meters must be positive, got {}", self.engine.eps_meters);
        }
        if self.engine.min_samples == 0 {
            anyhow::bail!("min_samples must be at least 1");
        }
        if self.engine.max_time_gap_days < 0 {
            anyhow::bail!(
                "max_time_gap_days must be non-negative, got {}",
                self.engine.max_time_gap_days
            );
        }
        if self.engine.timedelta_days < 1 {
            anyhow::bail!(
                "timedelta_days must be at least 1, got {}",
                self.engine.timedelta_days
            );
        }
        if self.engine.forecast_steps == 0 {
            anyhow::bail!("forecast_steps must be at least 1");
        }
        if self.engine.retention_runs == 0 {
            anyhow::bail!("retention_runs must be at least 1");
        }
        Ok(())
    }
}
