//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("message encode error: {0}")]
    Encode(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl QueueError {
    /// Malformed payloads are never retried; everything else is infrastructure.
    pub fn is_poison(&self) -> bool {
        matches!(self, QueueError::Parse(_))
    }
}
