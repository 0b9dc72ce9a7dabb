use thiserror::Error;

use crate::ai::provider::ProviderError;

/// Failure taxonomy for the chat coordinator.
///
/// Validation failures are surfaced only to the initiating client. Assistant
/// failures are degraded to in-room error messages by the relay and never
/// reach this type from the dispatch path.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// A second assistant dispatch was attempted while one is pending for
    /// the room. Rejected, never queued.
    #[error("an assistant request is already in flight for this room")]
    ConcurrencyConflict,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, ChatError>;
