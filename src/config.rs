//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: Where the http api listens.
//!     - LoggingConfig: Log level and whether each reading is logged.
//!     - TelemetryConfig: How many readings the "recent" view returns.
//!     - StorageConfig: Optional sqlite database for durability.
//!     - DetectionConfig: Optional remote pest classifier, upload size cap.
//!
//! lookup order:
//!     $HUB_CONFIG, then config/hub.toml, then ../config/hub.toml.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// env var naming an explicit config file
pub const CONFIG_ENV: &str = "HUB_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    /// size of the "recent readings" view
    pub recent_limit: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlite database file; in-memory only when unset
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConfig {
    /// classifier endpoint that takes raw image bytes
    pub classifier_url: Option<String>,
    pub timeout_ms: u64,
    /// largest image body accepted on a detection report
    pub max_image_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 5000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { recent_limit: 20 }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { classifier_url: None, timeout_ms: 5000, max_image_bytes: 16 * 1024 * 1024 }
    }
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// a file was found but could not be used
    Fallback { path: PathBuf, reason: String },
    Defaults,
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HubConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        if config.telemetry.recent_limit == 0 {
            anyhow::bail!("telemetry.recent_limit must be at least 1");
        }
        if config.detection.max_image_bytes == 0 {
            anyhow::bail!("detection.max_image_bytes must be at least 1");
        }
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is set up, so it reports where the config came
    /// from instead of logging it.
    pub fn load_or_default() -> (Self, ConfigSource) {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("hub.toml"));
        paths.push(PathBuf::from("..").join("config").join("hub.toml"));

        for path in paths {
            if path.exists() {
                return match Self::load(&path) {
                    Ok(config) => (config, ConfigSource::File(path)),
                    Err(e) => (Self::default(), ConfigSource::Fallback { path, reason: e.to_string() }),
                };
            }
        }

        (Self::default(), ConfigSource::Defaults)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            bind = %self.bind_addr(),
            log_level = %self.logging.level,
            recent_limit = self.telemetry.recent_limit,
            database = %self
                .storage
                .database_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "disabled".to_string()),
            classifier = self.detection.classifier_url.as_deref().unwrap_or("none"),
            "hub configuration"
        );
    }
}
