// src/error.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// How serious an error or verification issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Core error types for APKHub
#[derive(Error, Debug)]
pub enum Error {
    /// Bad configuration values or caller inputs
    #[error("Validation error: {0}")]
    Validation(String),

    /// Permission, space or missing-path failures tied to a specific path
    #[error("Filesystem error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed package or undecodable parser output
    #[error("Parse error: {0}")]
    Parsing(String),

    /// Manifest and configuration disagree
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Digest or signature mismatch
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file decoding errors
    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Directory traversal errors
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Invalid include/exclude glob
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] globset::Error),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileSystem {
            path: path.into(),
            source,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Error::Parsing(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Whether re-running the (idempotent) operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::FileSystem { .. } | Error::Parsing(_) | Error::Io(_) | Error::Walk(_)
        )
    }
}

/// Result type alias using APKHub's Error type
pub type Result<T> = std::result::Result<T, Error>;
