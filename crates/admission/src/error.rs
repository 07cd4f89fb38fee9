use thiserror::Error;
use uuid::Uuid;

use crate::{QueueKey, RequesterId};

/// Errors that can occur in the admission queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Capacity, batch size and interval must all be positive.
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// No active queue exists for the event.
    #[error("Queue not found: {0}")]
    QueueNotFound(QueueKey),

    /// The requester has no entry in this queue.
    #[error("No entry for {requester_id} in queue {key}")]
    EntryNotFound {
        key: QueueKey,
        requester_id: RequesterId,
    },

    /// No entry was issued under this token.
    #[error("Unknown entry token: {0}")]
    TokenNotFound(Uuid),

    /// Stored queue data could not be interpreted.
    #[error("Corrupt queue data: {0}")]
    Corrupt(String),

    /// The backing store could not be reached.
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),

    /// A Redis error occurred.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Returns true when the error means "nothing there" rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            QueueError::QueueNotFound(_)
                | QueueError::EntryNotFound { .. }
                | QueueError::TokenNotFound(_)
        )
    }
}

/// Result type for admission queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
