//! Error types for the notification aggregator
//!
//! Errors are classified by recoverability:
//! - Retryable: Network issues, timeouts, server-side HTTP failures
//! - NonRetryable: Configuration errors, malformed payloads, bad input
//!
//! Source and storage errors never escape the aggregator's public load and
//! dismiss operations. They are logged and degraded there; the types below
//! exist for the client, the store and the startup path.

use std::path::PathBuf;
use thiserror::Error;

/// Error types for backend access, persistence and configuration
#[derive(Debug, Error)]
pub enum NotifyError {
    // Retryable errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Backend returned HTTP {status} for {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    // Non-retryable errors
    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl NotifyError {
    /// Returns true if the next poll could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Network(_) | NotifyError::Timeout(_) => true,
            NotifyError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            NotifyError::Network(_) => "Check your connection to the SIGA server.",
            NotifyError::Timeout(_) => "The server took too long to answer. It will be retried.",
            NotifyError::HttpStatus { status, .. } if *status == 401 || *status == 403 => {
                "Your session may have expired. Sign in to SIGA again."
            }
            NotifyError::HttpStatus { .. } => "The SIGA server reported an error. It will be retried.",
            NotifyError::Parse(_) => "The server answered in an unexpected format.",
            NotifyError::Configuration(_) | NotifyError::ConfigNotFound(_) => {
                "Check your configuration in ~/.siga/config.json"
            }
            NotifyError::Storage(_) => "Local notification state will be rebuilt automatically.",
            NotifyError::Io(_) => "Check file permissions and disk space.",
            NotifyError::InvalidInput(_) => "Check the value you provided.",
        }
    }
}

impl From<std::io::Error> for NotifyError {
    fn from(err: std::io::Error) -> Self {
        NotifyError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(err: serde_json::Error) -> Self {
        NotifyError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NotifyError::Timeout(0)
        } else if err.is_decode() {
            NotifyError::Parse(err.to_string())
        } else {
            NotifyError::Network(err.to_string())
        }
    }
}

/// Serializable error representation for display surfaces
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
}

impl From<&NotifyError> for ErrorReport {
    fn from(err: &NotifyError) -> Self {
        let error_type = if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        ErrorReport {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
