//! Error types for renderfarm-dl
//!
//! A single crate-wide [`Error`] enum covers every failure the agent can hit:
//! configuration problems, file system and network I/O, unexpected responses
//! from the render-farm service, and the lifecycle errors of a job run
//! (cancellation, submitting to a closed job, a panicking executor).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for renderfarm-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for renderfarm-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "worker.thread_count")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A file host answered a transfer request with a non-success status
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        /// The requested URL
        url: String,
        /// The status code returned
        status: u16,
    },

    /// A path string could not be normalized or rewritten
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// A task was submitted after the job started joining
    #[error("job is closed: no tasks may be added once join has begun")]
    JobClosed,

    /// The operation was interrupted by the cancellation signal
    #[error("operation cancelled")]
    Cancelled,

    /// An executor panicked while running a task
    #[error("task executor panicked: {0}")]
    TaskPanicked(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Render the error together with its `source()` chain on one line.
    ///
    /// Used by the driver loop when logging iteration failures.
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !rendered.contains(&text) {
                rendered.push_str(": ");
                rendered.push_str(&text);
            }
            source = cause.source();
        }
        rendered
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_helper_records_key() {
        let err = Error::config("worker.thread_count", "must be at least 1");

        match &err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("worker.thread_count"));
                assert_eq!(message, "must be at least 1");
            }
            other => panic!("expected Config, got {other:?}"),
        }
        assert_eq!(err.to_string(), "configuration error: must be at least 1");
    }

    #[test]
    fn unexpected_status_message_names_url_and_code() {
        let err = Error::UnexpectedStatus {
            url: "http://files.example/a.bin".into(),
            status: 404,
        };

        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("http://files.example/a.bin"));
    }

    #[test]
    fn chain_includes_io_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied by policy");
        let err = Error::Io(io);

        let chain = err.chain();
        assert!(chain.starts_with("I/O error"));
        assert!(chain.contains("denied by policy"));
    }
}
