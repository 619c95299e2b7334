use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ble::link::LinkConfig;
use crate::logging::{LogConfig, LogFormat, LogLevel};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    #[serde(default)]
    pub metadata: ConfigMetadata,

    /// Storage locations
    #[serde(default)]
    pub settings: AppSettings,

    /// Sensor link behaviour
    #[serde(default)]
    pub link: LinkConfig,

    /// Logging
    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Data directory path
    pub data_dir: PathBuf,

    /// Session database; relative paths resolve against `data_dir`
    pub database_file: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            data_dir: AppConfig::default_data_dir(),
            database_file: PathBuf::from("sessions.db"),
        }
    }
}

impl AppSettings {
    pub fn database_path(&self) -> PathBuf {
        if self.database_file.is_absolute() {
            self.database_file.clone()
        } else {
            self.data_dir.join(&self.database_file)
        }
    }
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();

        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            metadata: ConfigMetadata::default(),
            settings: AppSettings::default(),
            link: LinkConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    fn base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".recoverysense")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    pub fn default_data_dir() -> PathBuf {
        Self::base_dir().join("data")
    }

    /// Load from a path, falling back to defaults when it is missing
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            debug!(path = %path.as_ref().display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_or_default_from(Self::default_config_path())
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to_file(config_path)
    }

    /// Dotted keys accepted by `get` and `set`
    pub const KEYS: [&'static str; 7] = [
        "settings.data_dir",
        "settings.database_file",
        "link.vendor_name_filter",
        "link.default_address",
        "link.sample_channel_capacity",
        "logging.level",
        "logging.format",
    ];

    /// Read one setting by dotted key
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "settings.data_dir" => self.settings.data_dir.display().to_string(),
            "settings.database_file" => self.settings.database_file.display().to_string(),
            "link.vendor_name_filter" => self.link.vendor_name_filter.clone(),
            "link.default_address" => self.link.default_address.clone().unwrap_or_default(),
            "link.sample_channel_capacity" => self.link.sample_channel_capacity.to_string(),
            "logging.level" => self.logging.level.as_str().to_string(),
            "logging.format" => format!("{:?}", self.logging.format).to_lowercase(),
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        };
        Ok(value)
    }

    /// Update one setting by dotted key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "settings.data_dir" => self.settings.data_dir = PathBuf::from(value),
            "settings.database_file" => self.settings.database_file = PathBuf::from(value),
            "link.vendor_name_filter" => {
                if value.trim().is_empty() {
                    anyhow::bail!("Vendor name filter cannot be empty");
                }
                self.link.vendor_name_filter = value.to_string();
            }
            "link.default_address" => {
                self.link.default_address = Some(value.trim())
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
            "link.sample_channel_capacity" => {
                let capacity: usize = value
                    .parse()
                    .with_context(|| format!("Invalid capacity: {}", value))?;
                if capacity == 0 {
                    anyhow::bail!("Channel capacity must be positive");
                }
                self.link.sample_channel_capacity = capacity;
            }
            "logging.level" => {
                self.logging.level = value.parse::<LogLevel>().map_err(anyhow::Error::msg)?
            }
            "logging.format" => {
                self.logging.format = value.parse::<LogFormat>().map_err(anyhow::Error::msg)?
            }
            _ => anyhow::bail!("Unknown configuration key: {}", key),
        }

        self.metadata.updated_at = Utc::now();
        Ok(())
    }
}
