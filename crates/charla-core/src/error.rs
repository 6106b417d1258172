//! Error types for Charla.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CharlaError {
    #[error("User not authenticated")]
    AuthenticationRequired,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Empty message")]
    EmptyMessage,

    #[error("Sequence contention for conversation {0}")]
    SequenceContention(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
