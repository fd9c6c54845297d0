//! Error types for LingoForge services
//!
//! Provides a single error enum covering:
//! - Caller mistakes (missing or empty input)
//! - Retrieval-side failures (embedding, vector index, metadata store)
//! - Language-model failures, classified into a closed set
//! - Ambient failures (queue, secrets, configuration)
//!
//! Status-code mapping is left to whatever transport layer sits in front of
//! the pipeline; `ErrorCode` and `is_caller_error` give it what it needs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Caller errors (1xxx)
    InvalidInput,
    InvalidQuery,

    // Retrieval errors (2xxx)
    EmbeddingError,
    IndexUnavailable,
    MetadataError,
    Inconsistent,

    // Model errors (3xxx)
    ResponseParseError,
    ModelTimeout,
    ModelValidation,
    ModelNotReady,
    ModelInvocation,

    // Infrastructure errors (8xxx)
    SecretUnavailable,
    QueueError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 1001,
            ErrorCode::InvalidQuery => 1002,

            ErrorCode::EmbeddingError => 2001,
            ErrorCode::IndexUnavailable => 2002,
            ErrorCode::MetadataError => 2003,
            ErrorCode::Inconsistent => 2004,

            ErrorCode::ResponseParseError => 3001,
            ErrorCode::ModelTimeout => 3002,
            ErrorCode::ModelValidation => 3003,
            ErrorCode::ModelNotReady => 3004,
            ErrorCode::ModelInvocation => 3005,

            ErrorCode::SecretUnavailable => 8001,
            ErrorCode::QueueError => 8002,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Caller errors
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    // Retrieval errors
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    #[error("Vector index unavailable: {message}")]
    IndexUnavailable { message: String },

    #[error("Metadata store error: {message}")]
    Metadata { message: String },

    #[error("Vector index and metadata store disagree for {ids:?}: {message}")]
    Inconsistent { ids: Vec<String>, message: String },

    // Model errors
    #[error("Could not parse model response: {message}")]
    ResponseParse { message: String },

    #[error("{message}")]
    ModelTimeout { message: String },

    #[error("{message}")]
    ModelValidation { message: String },

    #[error("{message}")]
    ModelNotReady { message: String },

    #[error("{message}")]
    ModelInvocation { message: String },

    // Infrastructure errors
    #[error("Secret unavailable: {message}")]
    SecretUnavailable { message: String },

    #[error("Queue error: {message}")]
    Queue { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::InvalidQuery { .. } => ErrorCode::InvalidQuery,
            AppError::Embedding { .. } => ErrorCode::EmbeddingError,
            AppError::IndexUnavailable { .. } => ErrorCode::IndexUnavailable,
            AppError::Metadata { .. } => ErrorCode::MetadataError,
            AppError::Inconsistent { .. } => ErrorCode::Inconsistent,
            AppError::ResponseParse { .. } => ErrorCode::ResponseParseError,
            AppError::ModelTimeout { .. } => ErrorCode::ModelTimeout,
            AppError::ModelValidation { .. } => ErrorCode::ModelValidation,
            AppError::ModelNotReady { .. } => ErrorCode::ModelNotReady,
            AppError::ModelInvocation { .. } => ErrorCode::ModelInvocation,
            AppError::SecretUnavailable { .. } => ErrorCode::SecretUnavailable,
            AppError::Queue { .. } => ErrorCode::QueueError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// True when the caller sent something unusable (maps to 4xx upstream)
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput { .. } | AppError::InvalidQuery { .. }
        )
    }

    /// True for any failure raised by the language-model path
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            AppError::ResponseParse { .. }
                | AppError::ModelTimeout { .. }
                | AppError::ModelValidation { .. }
                | AppError::ModelNotReady { .. }
                | AppError::ModelInvocation { .. }
        )
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        AppError::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn metadata(message: impl Into<String>) -> Self {
        AppError::Metadata {
            message: message.into(),
        }
    }

    pub(crate) fn index(message: impl Into<String>) -> Self {
        AppError::IndexUnavailable {
            message: message.into(),
        }
    }
}

/// Structured error body for whatever transport wraps the pipeline
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let code = err.code();
        ErrorResponse {
            error: ErrorDetails {
                code,
                numeric_code: code.as_code(),
                message: err.to_string(),
            },
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
