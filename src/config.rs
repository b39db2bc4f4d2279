//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `agrisense.toml`.
//!     loads configuration from file or falls back to defaults.
//!     reads the AI credential from the process environment.
//!
//! structure:
//!     - PollingConfig: How often the sensor feed is re-fetched.
//!     - SourcesConfig: Sensor feed URL, forecast URL and farm coordinates.
//!     - AiConfig: Text-generation endpoint, model and credential variable.
//!     - FarmConfig: Location string handed to the AI prompts.
//!     - ServerConfig: Where the JSON API listens.
//!     - LoggingConfig: Log level and per-cycle reading output.
//!
//! the credential never lives in the file - only the *name* of the
//! environment variable that carries it.
//!
//! ==============================================================================

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub farm: FarmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 15 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    /// soil sensor feed (JSON with an `items` array)
    pub sensor_url: String,
    /// forecast API base, without query string
    pub weather_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    /// days requested from the forecast API, today included
    pub forecast_days: u8,
    pub request_timeout_seconds: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sensor_url: "https://oracleapex.com/ords/g3_data/groups/data/7".to_string(),
            weather_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            latitude: -33.9091,
            longitude: 19.1214,
            timezone: "Africa/Johannesburg".to_string(),
            forecast_days: 4,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    /// API root, e.g. https://generativelanguage.googleapis.com/v1beta
    pub endpoint: String,
    pub model: String,
    /// environment variable holding the credential
    pub api_key_env: String,
    pub request_timeout_seconds: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FarmConfig {
    pub location: String,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self { location: "Franschhoek region, Western Cape, South Africa".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// chat sessions held at once; the least recently used is dropped past this
    pub max_chat_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            max_chat_sessions: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| anyhow!("Failed to parse config: {}", e))
    }

    /// Load with default fallback
    ///
    /// runs before logging is installed, so it reports on stdout.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("agrisense.toml"),
            PathBuf::from("..").join("config").join("agrisense.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            sensor_url = %self.sources.sensor_url,
            latitude = self.sources.latitude,
            longitude = self.sources.longitude,
            poll_interval_s = self.polling.interval_seconds,
            model = %self.ai.model,
            bind = %self.server.bind,
            max_chat_sessions = self.server.max_chat_sessions,
            log_level = %self.logging.level,
            "host configuration"
        );
    }

    /// Read the AI credential named by `ai.api_key_env`.
    ///
    /// A missing or blank value is fatal at startup.
    pub fn ai_credential(&self) -> Result<String> {
        credential_from(&self.ai.api_key_env, std::env::var(&self.ai.api_key_env).ok())
    }
}

fn credential_from(name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(anyhow!(
            "{} is not set. Export the AI service credential before starting the host.",
            name
        )),
    }
}
