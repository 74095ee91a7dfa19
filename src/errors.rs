use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("File too large: {path} is {size} bytes, limit is {limit} bytes")]
    AdmissionRejected { path: String, size: u64, limit: u64 },

    #[error("Could not read size of {path}: {reason}")]
    SizeProbeFailed { path: String, reason: String },

    #[error("Compression failed for {path}: {reason}")]
    CompressionFailed { path: String, reason: String },

    #[error("Still too large after compression: {path} is {size} bytes, limit is {limit} bytes")]
    StillTooLarge { path: String, size: u64, limit: u64 },

    #[error("Delivery failed: {reason}")]
    DeliveryFailed { reason: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Missing credential: set {variable} or pass --{flag}")]
    MissingCredential { variable: String, flag: String },

    #[error("Invalid directory: {path}")]
    InvalidDirectory { path: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn admission_rejected(path: &Path, size: u64, limit: u64) -> Self {
        Self::AdmissionRejected {
            path: path.display().to_string(),
            size,
            limit,
        }
    }

    pub fn size_probe_failed(path: &Path, reason: impl ToString) -> Self {
        Self::SizeProbeFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn compression_failed(path: &Path, reason: impl ToString) -> Self {
        Self::CompressionFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn still_too_large(path: &Path, size: u64, limit: u64) -> Self {
        Self::StillTooLarge {
            path: path.display().to_string(),
            size,
            limit,
        }
    }

    pub fn delivery_failed(reason: impl ToString) -> Self {
        Self::DeliveryFailed {
            reason: reason.to_string(),
        }
    }

    pub fn missing_credential(variable: &str, flag: &str) -> Self {
        Self::MissingCredential {
            variable: variable.to_string(),
            flag: flag.to_string(),
        }
    }

    pub fn invalid_directory(path: &Path) -> Self {
        Self::InvalidDirectory {
            path: path.display().to_string(),
        }
    }

    /// Errors that must stop the job before the scheduler starts.
    ///
    /// Everything the scheduler itself encounters degrades to a skipped file
    /// or an abandoned group instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::MissingCredential { .. }
                | AppError::InvalidDirectory { .. }
                | AppError::Config(_)
        )
    }
}
