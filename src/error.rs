// src/error.rs

//! Unified error handling for the ingestion pipeline.
//!
//! Failures are grouped by the unit they are isolated to:
//! - [`FetchError`]: one adapter request (page or image)
//! - [`StoreError`]: one store operation
//! - [`AppError`]: one ingestion cycle, or the application itself

use std::fmt;

use thiserror::Error;

use crate::models::SourceId;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for adapter fetches.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure of a source adapter request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, TLS or non-success HTTP status
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out or was cancelled by the cycle deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Upstream payload could not be interpreted
    #[error("parse failure: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn network(message: impl fmt::Display) -> Self {
        Self::Network(message.to_string())
    }

    pub fn timeout(message: impl fmt::Display) -> Self {
        Self::Timeout(message.to_string())
    }

    pub fn parse(message: impl fmt::Display) -> Self {
        Self::Parse(message.to_string())
    }

    /// Error reported when the caller's cancellation token fires.
    pub fn cancelled() -> Self {
        Self::Timeout("request cancelled before completion".to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Per-record extraction failure. Logged and skipped by the adapter, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record {position} is missing required field `{field}`")]
pub struct ExtractionError {
    /// Index of the item within its page
    pub position: usize,
    pub field: &'static str,
}

/// Failure of a persistent store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with the same (source, external id) already exists
    #[error("record {external_id} already exists for source {source_id}")]
    Conflict {
        source_id: SourceId,
        external_id: String,
    },

    /// No record with the given surrogate key
    #[error("record {0} not found")]
    NotFound(i64),

    /// Storage backend failure (I/O, serialization)
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(message: impl fmt::Display) -> Self {
        Self::Backend(message.to_string())
    }

    /// Whether this is the benign duplicate-key conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// No adapter registered for the source
    #[error("no adapter registered for source {0}")]
    UnknownSource(SourceId),

    /// Another ingestion cycle for the source is still in flight
    #[error("ingestion already running for source {0}")]
    AlreadyRunning(SourceId),

    /// Adapter fetch failed; the cycle was aborted before reconciliation
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Cycle task panicked
    #[error("ingestion for source {source_id} panicked: {message}")]
    Panicked { source_id: SourceId, message: String },

    /// Cycle did not report back before the trigger deadline
    #[error("ingestion for source {0} exceeded the trigger deadline")]
    DeadlineExceeded(SourceId),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Cron expression parsing failed
    #[error("Invalid cron expression '{expression}': {message}")]
    Cron { expression: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a cron parsing error.
    pub fn cron(expression: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Cron {
            expression: expression.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_benign() {
        let err = StoreError::Conflict {
            source_id: SourceId(7),
            external_id: "A".into(),
        };
        assert!(err.is_conflict());
        assert!(!StoreError::NotFound(1).is_conflict());
    }

    #[test]
    fn fetch_error_wraps_into_app_error() {
        let err: AppError = FetchError::timeout("deadline").into();
        assert!(matches!(err, AppError::Fetch(FetchError::Timeout(_))));
        assert_eq!(err.to_string(), "fetch failed: timeout: deadline");
    }

    #[test]
    fn json_error_is_parse_failure() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(FetchError::from(err), FetchError::Parse(_)));
    }
}
