use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::media_groups::GroupingPolicy;

pub const BOT_TOKEN_VAR: &str = "UPLOADER_BOT_TOKEN";
pub const CHAT_ID_VAR: &str = "UPLOADER_CHAT_ID";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_filesize: u64,
    pub max_group_bytes: u64,
    pub max_photo_bytes: u64,
    pub files_per_message: usize,
    pub msg_limit: usize,
    pub window_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub scale_factor: f32,
    pub quality: f32,
    pub grouping: GroupingPolicy,
    /// `None` follows the grouping policy: substitute only when exhaustive.
    pub substitute_reduced: Option<bool>,
    pub request_timeout_secs: u64,
    pub api_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_filesize: 50 * MIB,
            max_group_bytes: 50 * MIB,
            max_photo_bytes: 10 * MIB,
            files_per_message: 10,
            msg_limit: 20,
            window_ms: 61_000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 120_000,
            scale_factor: 0.85,
            quality: 0.45,
            grouping: GroupingPolicy::Sequential,
            substitute_reduced: None,
            request_timeout_secs: 120,
            api_base_url: "https://api.telegram.org".to_string(),
        }
    }
}

impl Config {
    pub fn substitutes_reduced(&self) -> bool {
        self.substitute_reduced
            .unwrap_or(self.grouping == GroupingPolicy::Exhaustive)
    }
}

/// Resolved bot token and chat target
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub chat_id: String,
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("telegram-uploader");

    Ok(config_dir.join("config.json"))
}

/// Load the configuration from `path`, or from the default location when
/// `path` is `None`. A missing default file yields the defaults; a file that
/// fails to parse is logged and replaced by the defaults.
pub fn load_config(path: Option<&Path>) -> AppResult<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(AppError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => match get_config_path() {
            Ok(p) => p,
            Err(e) => {
                log::debug!("{}, using defaults", e);
                return Ok(Config::default());
            }
        },
    };

    if !config_path.exists() {
        log::debug!(
            "No config file at {}, using defaults",
            config_path.display()
        );
        return Ok(Config::default());
    }

    let config_str = fs::read_to_string(&config_path)?;
    let config = parse_config(&config_str).unwrap_or_else(|e| {
        log::warn!(
            "Failed to parse config file {}: {}. Using defaults.",
            config_path.display(),
            e
        );
        Config::default()
    });

    log::info!("Loaded configuration from {}", config_path.display());
    Ok(config)
}

pub fn parse_config(config_str: &str) -> AppResult<Config> {
    Ok(serde_json::from_str(config_str)?)
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if config.files_per_message == 0 || config.files_per_message > 10 {
        return Err(AppError::validation(
            "files_per_message",
            "Must be between 1 and 10",
        ));
    }

    if config.files_per_message > config.msg_limit {
        return Err(AppError::validation(
            "msg_limit",
            "Must be at least files_per_message",
        ));
    }

    if config.max_filesize == 0 || config.max_group_bytes == 0 {
        return Err(AppError::validation(
            "max_filesize",
            "Size limits must be greater than 0",
        ));
    }

    if config.max_photo_bytes > config.max_group_bytes {
        return Err(AppError::validation(
            "max_photo_bytes",
            "Must not exceed max_group_bytes",
        ));
    }

    if config.window_ms == 0 {
        return Err(AppError::validation("window_ms", "Must be at least 1ms"));
    }

    if config.max_retries > 10 {
        return Err(AppError::validation("max_retries", "Must be 10 or fewer"));
    }

    if config.retry_max_delay_ms < config.retry_base_delay_ms {
        return Err(AppError::validation(
            "retry_max_delay_ms",
            "Must be at least retry_base_delay_ms",
        ));
    }

    validate_positive("scale_factor", config.scale_factor)?;
    validate_positive("quality", config.quality)?;

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be greater than 0",
        ));
    }

    if !config.api_base_url.starts_with("http://") && !config.api_base_url.starts_with("https://")
    {
        return Err(AppError::validation(
            "api_base_url",
            "Must be an http(s) URL",
        ));
    }

    Ok(())
}

// Range is left to the reducer: only positive finite values are rejected here.
fn validate_positive(field: &str, value: f32) -> AppResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AppError::validation(field, "Must be a positive finite number"));
    }
    Ok(())
}

/// Resolve credentials from explicit overrides first, then the environment.
pub fn resolve_credentials(
    token_override: Option<String>,
    chat_id_override: Option<String>,
) -> AppResult<Credentials> {
    let token = token_override
        .or_else(|| std::env::var(BOT_TOKEN_VAR).ok())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::missing_credential(BOT_TOKEN_VAR, "token"))?;

    let chat_id = chat_id_override
        .or_else(|| std::env::var(CHAT_ID_VAR).ok())
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::missing_credential(CHAT_ID_VAR, "chat-id"))?;

    let token = token.trim().to_string();
    let chat_id = chat_id.trim().to_string();

    InputValidator::validate_bot_token(&token)?;
    InputValidator::validate_chat_id(&chat_id)?;

    Ok(Credentials { token, chat_id })
}
