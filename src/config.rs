use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Endpoint that receives the in-progress clip while recording
    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    /// Milliseconds between upload attempts
    #[serde(default = "default_upload_interval_ms")]
    pub upload_interval_ms: u64,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_upload_url() -> String {
    "http://127.0.0.1:9000/recordings".to_string()
}

fn default_upload_interval_ms() -> u64 {
    2500
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_url: default_upload_url(),
            upload_interval_ms: default_upload_interval_ms(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/tapeloop/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("tapeloop").join("config.json"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.upload_url.is_empty() {
            return Err(anyhow::anyhow!("upload_url cannot be empty"));
        }

        if self.upload_interval_ms == 0 {
            return Err(anyhow::anyhow!("upload_interval_ms must be positive"));
        }

        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("sample_rate must be positive"));
        }

        if !(1..=2).contains(&self.channels) {
            return Err(anyhow::anyhow!("channels must be 1 or 2"));
        }

        Ok(())
    }
}
