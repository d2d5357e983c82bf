//! Error types for the embedded Redis supervisor.
//!
//! Every fallible operation in the crate returns [`RedisServerError`]. Errors raised
//! while constructing a [`RedisServer`](crate::RedisServer) leave nothing usable
//! behind; errors raised by `start` leave the supervisor idle.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the embedded Redis supervisor.
#[derive(Debug, Error)]
pub enum RedisServerError {
    // Construction errors
    #[error("Unsupported os/architecture: {os}")]
    UnsupportedPlatform { os: String },

    #[error("No embedded redis-server artifact at {key}")]
    ArtifactNotFound { key: String },

    #[error("Failed to extract redis-server to {path:?}: {message}")]
    Extraction {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to allocate a free port")]
    PortAllocation {
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Lifecycle errors
    #[error("This redis server instance is already running")]
    AlreadyRunning,

    #[error("This redis server instance has been stopped; create a new one to restart")]
    AlreadyStopped,

    #[error("Failed to launch {path}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("redis-server exited before it was ready ({lines_read} lines read, last: {last_line:?})")]
    NotReady {
        lines_read: usize,
        last_line: Option<String>,
    },

    #[error("redis-server was not ready within {0:?}")]
    StartupTimeout(Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, RedisServerError>;

impl From<std::io::Error> for RedisServerError {
    fn from(err: std::io::Error) -> Self {
        RedisServerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl RedisServerError {
    /// Create an extraction error with path context.
    pub fn extraction(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RedisServerError::Extraction {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RedisServerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error may go away by simply trying again.
    ///
    /// A timed out startup or a port that could not be bound depend on machine
    /// load; everything else is a configuration or caller error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RedisServerError::StartupTimeout(_) | RedisServerError::PortAllocation { .. }
        )
    }
}
