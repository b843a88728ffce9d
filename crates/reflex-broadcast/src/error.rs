//! Error types for reflex-broadcast

use crate::PlayerId;
use thiserror::Error;

/// Broadcast error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A player asked for the shared state twice without leaving in between
    #[error("Player {0} cannot request state more than once")]
    DuplicateStateRequest(PlayerId),

    /// The middleware has not been applied to a producer yet
    #[error("Middleware is not attached to a producer")]
    NotAttached,

    /// A broadcast named an action the local producer does not define
    #[error("Unknown broadcast action: {0}")]
    UnknownAction(String),

    /// The server state request failed
    #[error("State request failed: {0}")]
    StateRequest(String),

    /// Encoding or decoding a payload failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error raised by a producer
    #[error(transparent)]
    Core(#[from] reflex_core::Error),
}

/// Result type for broadcast operations
pub type Result<T> = std::result::Result<T, Error>;
