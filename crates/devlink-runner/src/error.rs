use std::path::PathBuf;

/// Errors surfaced by command execution, watching and cancellation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The watch target does not exist (or disappeared before it was written).
    #[error("watch target not found: {0}")]
    NotFound(PathBuf),

    /// The operation did not complete before its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The operation was cancelled through its token.
    #[error("operation cancelled")]
    Cancelled,

    /// The external tool exited with a non-zero status.
    #[error("tool exited with status {code}")]
    ProcessExitNonZero { code: i32 },

    /// The watched result file did not contain parseable JSON.
    #[error("result file was not parseable: {0}")]
    MalformedResult(String),

    /// Filesystem watch error.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// An I/O error occurred spawning the tool or reading the result.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
