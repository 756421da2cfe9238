//! Error types for the remediation engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("record store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("actioner '{0}' does not support reversal")]
    ReverseUnsupported(String),

    #[error("notifier error: {0}")]
    Notifier(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
