//! Error types for reflex-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Producer has been destroyed")]
    Destroyed,

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Missing argument at position {0}")]
    MissingArgument(usize),

    #[error("Action failed: {0}")]
    Action(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
