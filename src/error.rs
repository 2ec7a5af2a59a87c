//! Error types for the durable log and the chat client.

use crate::types::Sequence;
use thiserror::Error;

/// Main error type for log and chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("Unsupported log address: {0}")]
    UnsupportedAddress(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Stream already exists: {0}")]
    StreamExists(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    #[error("Consumer {0} already exists with a different configuration")]
    ConsumerConflict(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No stream accepts subject: {0}")]
    NoStreamForSubject(String),

    #[error("Sequence {0:?} is not pending for consumer {1}")]
    NotPending(Sequence, String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Subscription closed")]
    SubscriptionClosed,
}

impl ChatError {
    /// True for the "not found" class that triggers channel creation.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::StreamNotFound(_))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ChatError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ChatError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ChatError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ChatError::Deserialization(e.to_string())
    }
}

/// Result type for log and chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
