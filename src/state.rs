use std::fs;
use std::path::{Path, PathBuf};

use crate::error::NotifyError;
use crate::types::Config;

/// Get the state directory (~/.siga), creating it on first use
pub fn get_state_dir() -> Result<PathBuf, NotifyError> {
    let home = dirs::home_dir()
        .ok_or_else(|| NotifyError::Configuration("Could not find home directory".to_string()))?;
    let state_dir = home.join(".siga");

    if !state_dir.exists() {
        fs::create_dir_all(&state_dir)?;
    }

    Ok(state_dir)
}

/// Get the canonical config file path (~/.siga/config.json)
pub fn config_path() -> Result<PathBuf, NotifyError> {
    Ok(get_state_dir()?.join("config.json"))
}

/// Path of the durable key/value store (~/.siga/storage.json)
pub fn storage_path() -> Result<PathBuf, NotifyError> {
    Ok(get_state_dir()?.join("storage.json"))
}

/// Load configuration from ~/.siga/config.json
pub fn load_config() -> Result<Config, NotifyError> {
    load_config_from(&config_path()?)
}

/// Load and validate configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Config, NotifyError> {
    if !path.exists() {
        return Err(NotifyError::ConfigNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| NotifyError::Configuration(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), NotifyError> {
    url::Url::parse(&config.api_base_url).map_err(|e| {
        NotifyError::Configuration(format!("Invalid apiBaseUrl '{}': {}", config.api_base_url, e))
    })?;
    config.tz()?;
    if config.request_timeout_secs == 0 {
        return Err(NotifyError::Configuration(
            "requestTimeoutSecs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
