use crate::models::UploaderConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use thiserror::Error;

/// File name of the uploader settings inside the config directory
pub const CONFIG_FILE_NAME: &str = "Uploader.yaml";

/// Prefix for environment overrides, e.g. `DAM_UPLOAD_PROGRESS_STEP=10`
pub const ENV_PREFIX: &str = "DAM_UPLOAD";

/// Settings that parse but make no sense.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("progress_step must be between 1 and 100, got {0}")]
    ProgressStep(u8),

    #[error("chunk_size must be greater than zero")]
    ChunkSize,

    #[error("event_capacity must be greater than zero")]
    EventCapacity,

    #[error("allowed_asset_types is empty; nothing could be uploaded")]
    NoAllowedTypes,

    #[error("Invalid rejected pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Check value ranges and that every rejection pattern compiles.
pub fn validate(config: &UploaderConfig) -> Result<(), ConfigError> {
    if !(1..=100).contains(&config.progress_step) {
        return Err(ConfigError::ProgressStep(config.progress_step));
    }
    if config.chunk_size == 0 {
        return Err(ConfigError::ChunkSize);
    }
    if config.event_capacity == 0 {
        return Err(ConfigError::EventCapacity);
    }
    if config.allowed_asset_types.is_empty() {
        return Err(ConfigError::NoAllowedTypes);
    }
    for pattern in &config.rejected_patterns {
        Regex::new(pattern).map_err(|e| ConfigError::Pattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Configuration manager for the uploader settings.
///
/// Layers, lowest precedence first:
/// - built-in defaults ([`UploaderConfig::default`])
/// - `Uploader.yaml` in the config directory (optional)
/// - `DAM_UPLOAD_*` environment variables
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
    env_prefix: String,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
            env_prefix: ENV_PREFIX.to_string(),
        })
    }

    /// Read environment overrides under a different prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load and validate the layered configuration.
    pub fn load(&self) -> Result<UploaderConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.config_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_asset_types")
                    .with_list_parse_key("rejected_patterns"),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: UploaderConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        validate(&config)
            .with_context(|| format!("Invalid config: {}", self.config_path))?;

        tracing::info!("Loaded uploader config from {}", self.config_dir);
        Ok(config)
    }

    /// Save the configuration file.
    pub fn save(&self, config: &UploaderConfig) -> Result<()> {
        validate(config).context("Refusing to save invalid config")?;

        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved uploader config to {}", self.config_path);
        Ok(())
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}
