//! Error types
//!
//! `ExecutionError` is what a request can fail with. Program failures
//! (non-zero exit, signal, timeout, OOM) are not errors: they come back as a
//! normal result whose run stage encodes the failure.

use thiserror::Error;

use crate::models::FileEncoding;

/// Request-level failure of an execution
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("At least one file is required")]
    MissingFiles,

    #[error("Invalid {encoding} content in file {file}: {reason}")]
    InvalidEncoding {
        file: String,
        encoding: FileEncoding,
        reason: String,
    },

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Runtime image not found: {0}. Please build the runner images first.")]
    ImageNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Caused by the request itself rather than by the service
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ExecutionError::Internal(_))
    }
}

impl From<BackendError> for ExecutionError {
    fn from(err: BackendError) -> Self {
        ExecutionError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::Internal(format!("staging failed: {}", err))
    }
}

/// Classified failure of a container backend call
#[derive(Debug, Error)]
pub enum BackendError {
    /// Daemon could not be reached (socket, transport, timeout)
    #[error("container backend unavailable: {0}")]
    Unavailable(String),

    /// Referenced image or container does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Daemon accepted the request but the container could not run
    #[error("container failed: {message}")]
    ContainerFailed {
        message: String,
        exit_code: Option<i64>,
    },

    /// Any other daemon response
    #[error("container backend error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Runtime table could not be loaded
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read runtime table {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse runtime table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid runtime {language}: {reason}")]
    Invalid { language: String, reason: String },
}

/// Settings could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}
