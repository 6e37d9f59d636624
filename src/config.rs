use crate::store::{AutosaveConfig, StorageConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["whistle.yaml", "whistle.yml"];

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse YAML config '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let StorageConfig::File { path } = &self.storage
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid(
                "storage.path must not be empty".to_string(),
            ));
        }

        if self.autosave.enabled && self.autosave.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "autosave.interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    // An empty file means "all defaults"
    let config: AppConfig = if contents.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration with fallback options
///
/// `CONFIG_PATH` wins when set and must point at a valid file. Otherwise the
/// first existing default location is used, and with none present the
/// built-in defaults apply.
pub fn load_config_with_fallback() -> Result<AppConfig, ConfigError> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        return load_config(&config_path);
    }

    for path in DEFAULT_CONFIG_PATHS {
        if Path::new(path).exists() {
            return load_config(path);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(AppConfig::default())
}
