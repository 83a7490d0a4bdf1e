use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Kernel ConfigFS create/write/remove failure
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No USB Device Controller (UDC) found")]
    NoUdcAvailable,

    #[error("Image unavailable: {}", .0.display())]
    ImageUnavailable(PathBuf),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("No image selected. Use 'iso' command first.")]
    ImageNotSelected,

    #[error("USB gadget is not active")]
    GadgetNotActive,

    /// HID character device open/write failure
    #[error("HID transport error: {0}")]
    Transport(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Application configuration (TOML) error
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image write failed: {0}")]
    WriteFailed(String),

    #[error("Image write cancelled")]
    WriteCancelled,

    #[error("Line editor error: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),
}

impl AppError {
    /// Wrap an I/O error on a ConfigFS path
    pub fn configfs(action: &str, path: &std::path::Path, e: impl std::fmt::Display) -> Self {
        AppError::Configuration(format!("Failed to {} {}: {}", action, path.display(), e))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
