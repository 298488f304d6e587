//! Settings error types.

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON, or a value has the wrong shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// Well-formed settings that break a cross-field rule.
    #[error("settings rejected: {0}")]
    InvalidValue(String),
}

/// `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, SettingsError>;
