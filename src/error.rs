//! Error types for transport operations.

use std::path::PathBuf;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors produced while launching the child process.
///
/// Launch failures are fatal to the connect attempt and are never retried
/// automatically.
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    /// The configured working directory does not exist.
    #[error("working directory does not exist: {}", .0.display())]
    WorkingDirectoryMissing(PathBuf),
    /// The resolved executable path does not exist.
    #[error("executable not found: {}", .0.display())]
    ExecutableMissing(PathBuf),
    /// Any other OS-level spawn failure.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors that can occur in transport operations.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Operation attempted while not connected, or a second connect attempt.
    #[error("connection error: {0}")]
    Connection(String),

    /// The child process could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Accumulated stdout exceeded the buffer bound before parsing.
    ///
    /// Recovered locally: the buffer is reset and the stream continues, so
    /// this is a non-fatal event on the message channel.
    #[error("JSON message exceeded maximum buffer size of {limit} bytes")]
    BufferOverflow {
        /// The accumulator bound that was exceeded.
        limit: usize,
    },

    /// The child process exited with a non-zero status.
    #[error("process exited with code {exit_code}")]
    ProcessExit {
        /// Exit code reported by the OS (-1 when killed by a signal).
        exit_code: i32,
        /// Stderr captured while the process ran; may be empty.
        stderr: String,
    },

    /// The child answered a control request with an error, or the request
    /// was abandoned before a response arrived.
    #[error("control request failed: {0}")]
    ControlRequest(String),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error on one of the child's standard streams.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Shorthand for the "not connected" connection error.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::Connection("not connected".to_string())
    }
}
