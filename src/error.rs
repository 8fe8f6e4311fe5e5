use thiserror::Error;

use crate::model::UserId;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
}

/// Failure on a single connection's transport. Never fatal beyond that connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection already closed")]
    Closed,
    #[error("transport error: {0}")]
    Io(String),
    /// The frame arrived but could not be decoded. The connection survives.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Offline(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("participants unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("a conversation needs two distinct users, got {0} twice")]
    InvalidParticipants(UserId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} must be true or false, got {value:?}")]
    InvalidFlag { key: &'static str, value: String },
}
