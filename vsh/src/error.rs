//! Error types for vsh

use thiserror::Error;

use crate::vfs::FsError;

/// Result type alias for vsh operations
pub type ShellResult<T> = Result<T, ShellError>;

/// Error types for vsh shell operations
///
/// Ordinary command failures never surface through this type; they become
/// stderr text and an exit code. `Internal` is what [`crate::Shell::run`]
/// rejects with.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Structural parse error (unterminated `if`, stray `done`, ...)
    #[error("syntax error: {0}")]
    Parse(String),

    /// Statement-level usage error detected before execution
    #[error("{0}")]
    Usage(String),

    /// Filesystem collaborator error
    #[error("{0}")]
    Fs(#[from] FsError),

    /// Host IO error (binary only)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Interpreter defect
    #[error("internal error: {0}")]
    Internal(String),

    /// Execution was cancelled by a signal
    #[error("cancelled by {0}")]
    Cancelled(String),
}

impl ShellError {
    /// Exit status used when this error is reported as shell output.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Parse(_) | Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
            Self::Fs(_) | Self::Io(_) | Self::Internal(_) => 1,
        }
    }
}
