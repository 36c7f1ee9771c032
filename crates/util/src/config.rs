//! Loading, saving, and validating the client configuration file.

use std::env;
use std::fs::{self, create_dir_all, write};
use std::path::{Path, PathBuf};

use clipflow_types::ClientConfig;
use dirs_next::config_dir;
use thiserror::Error;
use tracing::debug;

use crate::expand_tilde;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_PATH_ENV: &str = "CLIPFLOW_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("clipflow").join("config.json")
}

/// Loads configuration from the default path.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads configuration from a specific path. A missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(ClientConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ClientConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Saves configuration to a specific path, creating parent directories.
pub fn save_config_to_path(config: &ClientConfig, path: &Path) -> Result<(), ConfigError> {
    validate_config(config)?;
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent_directory) = path.parent() {
        create_dir_all(parent_directory).map_err(io_error)?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    write(path, content).map_err(io_error)?;
    Ok(())
}

pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    let rpc_url = config.network.rpc_url.trim();
    if rpc_url.is_empty() {
        return Err(ConfigError::Invalid {
            field: "network.rpcUrl",
            reason: "must not be empty".to_string(),
        });
    }
    if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            field: "network.rpcUrl",
            reason: format!("'{rpc_url}' must use http or https"),
        });
    }
    if config.retry.attempts == 0 {
        return Err(ConfigError::Invalid {
            field: "retry.attempts",
            reason: "must be at least 1".to_string(),
        });
    }
    if let Some(slippage) = config.default_slippage
        && !(0.0..100.0).contains(&slippage)
    {
        return Err(ConfigError::Invalid {
            field: "defaultSlippage",
            reason: format!("{slippage} is outside [0, 100)"),
        });
    }
    Ok(())
}
