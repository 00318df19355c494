//! Container engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine CLI invocation failed.
    #[error("engine {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Instance was not found.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Failed to parse engine output.
    #[error("failed to parse engine output: {0}")]
    ParseError(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Build a `CommandFailed` for the given subcommand.
    pub(crate) fn command(command: &str, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            message: message.into(),
        }
    }
}
