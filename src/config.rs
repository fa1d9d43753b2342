use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};

const APP_DIR_NAME: &str = "Screenshot Uploader";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploaderConfig {
    pub default_service: String,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub imgur: ImgurConfig,
    pub pomf: PomfConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImgurConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PomfConfig {
    pub upload_url: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            default_service: "imgur".to_string(),
            request_timeout_secs: 120,
            log_level: "info".to_string(),
            imgur: ImgurConfig::default(),
            pomf: PomfConfig::default(),
        }
    }
}

impl Default for ImgurConfig {
    fn default() -> Self {
        Self {
            client_id: "3ebe94c791445c1".to_string(),
            client_secret: String::new(),
            api_base: "https://api.imgur.com".to_string(),
        }
    }
}

impl Default for PomfConfig {
    fn default() -> Self {
        Self {
            upload_url: "https://pomf.lain.la/upload.php".to_string(),
        }
    }
}

fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

/// Default location for the key/value settings file.
pub fn get_settings_path() -> AppResult<PathBuf> {
    Ok(get_config_path()?.with_file_name("settings.json"))
}

pub fn load_config() -> AppResult<UploaderConfig> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &PathBuf) -> AppResult<UploaderConfig> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: UploaderConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            UploaderConfig::default()
        });

        validate_config(&config)?;

        Ok(config)
    } else {
        let default_config = UploaderConfig::default();
        save_config_to(&default_config, config_path)?;
        Ok(default_config)
    }
}

pub fn save_config(config: &UploaderConfig) -> AppResult<()> {
    save_config_to(config, &get_config_path()?)
}

pub fn save_config_to(config: &UploaderConfig, config_path: &PathBuf) -> AppResult<()> {
    validate_config(config)?;

    // Create backup of existing config
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &UploaderConfig) -> AppResult<()> {
    if config.default_service.trim().is_empty() {
        return Err(AppError::validation("default_service", "Must not be empty"));
    }

    if config.request_timeout_secs == 0 || config.request_timeout_secs > 3600 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be between 1 and 3600",
        ));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    if config.imgur.client_id.trim().is_empty() {
        return Err(AppError::validation("imgur.client_id", "Must not be empty"));
    }

    for (field, url) in [
        ("imgur.api_base", &config.imgur.api_base),
        ("pomf.upload_url", &config.pomf.upload_url),
    ] {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::validation(field, "Must be an http(s) URL"));
        }
    }

    Ok(())
}

// Reset configuration to defaults
pub fn reset_config() -> AppResult<()> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.reset_backup");
        fs::copy(&config_path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    save_config_to(&UploaderConfig::default(), &config_path)?;

    log::info!("Configuration reset to defaults");
    Ok(())
}
