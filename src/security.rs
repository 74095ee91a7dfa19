use regex::Regex;
use std::path::{Path, PathBuf};
use crate::errors::{AppError, AppResult};

pub struct InputValidator;

impl InputValidator {
    pub fn validate_bot_token(token: &str) -> AppResult<()> {
        if token.is_empty() {
            return Err(AppError::validation("token", "Bot token cannot be empty"));
        }

        // <bot id>:<secret>
        let token_pattern = Regex::new(r"^\d{5,20}:[\w\-]{30,64}$")
            .map_err(|e| AppError::Config(e.to_string()))?;

        if !token_pattern.is_match(token) {
            return Err(AppError::validation("token", "Bot token is malformed"));
        }

        Ok(())
    }

    pub fn validate_chat_id(chat_id: &str) -> AppResult<()> {
        if chat_id.is_empty() {
            return Err(AppError::validation("chat_id", "Chat id cannot be empty"));
        }

        // Numeric id (negative for groups and channels) or public @username
        let chat_pattern = Regex::new(r"^(-?\d{1,20}|@[A-Za-z][A-Za-z0-9_]{4,31})$")
            .map_err(|e| AppError::Config(e.to_string()))?;

        if !chat_pattern.is_match(chat_id) {
            return Err(AppError::validation(
                "chat_id",
                "Must be a numeric id or an @username",
            ));
        }

        Ok(())
    }

    pub fn validate_directory(path: &Path) -> AppResult<()> {
        if path.as_os_str().is_empty() {
            return Err(AppError::validation("directory", "Path cannot be empty"));
        }

        if !path.is_dir() {
            return Err(AppError::invalid_directory(path));
        }

        // Fail early on unreadable roots
        std::fs::read_dir(path).map_err(|e| {
            log::error!("Cannot read {}: {}", path.display(), e);
            AppError::invalid_directory(path)
        })?;

        Ok(())
    }
}

// File system security utilities
pub struct FileSystemGuard;

impl FileSystemGuard {
    fn temp_root() -> PathBuf {
        std::env::temp_dir().join("telegram_uploader_secure")
    }

    /// Reserve a unique path for a temporary artifact derived from `original_path`.
    pub fn create_secure_temp_file(original_path: &Path) -> AppResult<PathBuf> {
        let temp_dir = Self::temp_root();
        std::fs::create_dir_all(&temp_dir)?;

        let random_name = uuid::Uuid::new_v4().to_string();
        let extension = original_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("tmp");

        Ok(temp_dir.join(format!("{}.{}", random_name, extension)))
    }

    pub fn is_temp_artifact(path: &Path) -> bool {
        path.starts_with(Self::temp_root())
    }

    pub fn remove_temp_artifact(path: &Path) {
        if !Self::is_temp_artifact(path) {
            log::warn!(
                "Refusing to remove {}: not a temporary artifact",
                path.display()
            );
            return;
        }

        match std::fs::remove_file(path) {
            Ok(_) => log::debug!("Cleaned up temporary file: {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to clean up {}: {}", path.display(), e),
        }
    }

    pub fn get_file_size(path: &Path) -> AppResult<u64> {
        let metadata = std::fs::metadata(path)?;
        Ok(metadata.len())
    }
}
