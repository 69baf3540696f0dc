//! Error types for the LiteServ testkit

use thiserror::Error;

/// Result type alias using the testkit Error
pub type Result<T> = std::result::Result<T, Error>;

/// Testkit error types
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected server spec or harness configuration. The message is
    /// rendered verbatim so callers can match on it.
    #[error("{0}")]
    Configuration(String),

    #[error("LiteServ already running at {url}")]
    AlreadyRunning { url: String },

    #[error("Download failed: {url} returned {status}")]
    Download { url: String, status: u16 },

    #[error("Install failed: {0}")]
    Install(String),

    #[error("Could not reach {url} after {attempts} attempts")]
    Unreachable { url: String, attempts: u32 },

    #[error("Expected version does not match actual version: Expected={expected}  Actual={actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Unexpected LiteServ platform running: expected {expected}, got {actual}")]
    WrongPlatform { expected: String, actual: String },

    #[error("LiteServ still reachable at {url} after stop")]
    StopVerification { url: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Playbook {playbook} exited with status {exit_code}")]
    Playbook { playbook: String, exit_code: i32 },

    #[error("Device command failed: {0}")]
    DeviceCommand(String),

    #[error("Malformed status payload: {0}")]
    MalformedStatus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether this error came from the server reporting the wrong build or
    /// the wrong platform family.
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            Error::VersionMismatch { .. } | Error::WrongPlatform { .. }
        )
    }
}
