//! Error types for webcompile-core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for webcompile-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while pooling sandboxes and executing code.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Submitted request failed validation (code size, missing fields).
    #[error("invalid request: {0}")]
    Validation(String),

    /// No build/run command is registered for the language.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// A sandbox could not be created.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Source code could not be written into the sandbox workspace.
    #[error("cannot write source file: {0}")]
    Write(#[source] std::io::Error),

    /// The isolation runtime rejected or failed an operation.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Killing or removing a sandbox failed.
    #[error("teardown failed: {0}")]
    Teardown(String),

    /// Invalid sandbox state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// No sandbox became available before the acquire deadline.
    #[error("no sandbox available after {0:?}, server overloaded")]
    Overloaded(Duration),

    /// The pool has been shut down.
    #[error("sandbox pool is shutting down")]
    ShuttingDown,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether this error may be reported to the client that submitted code.
    ///
    /// Provisioning, teardown and runtime failures stay in the logs.
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::UnsupportedLanguage(_)
                | Self::Write(_)
                | Self::Overloaded(_)
                | Self::ShuttingDown
        )
    }
}
