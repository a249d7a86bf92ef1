//! Error types for the keep-alive monitor.

use thiserror::Error;

/// Result type alias for kam operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring the host.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is missing, unreadable or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A component was started twice.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// A component was stopped while not running.
    #[error("{0} is not running")]
    NotRunning(&'static str),

    /// An external process could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Thread-related error.
    #[error("thread error: {0}")]
    ThreadError(String),

    /// The idle command failed to run.
    #[error("idle command failed: {0}")]
    Command(String),

    /// A kernel counter file could not be parsed.
    #[error("cannot parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
