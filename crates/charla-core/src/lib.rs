//! Conversation and message synchronization core for Charla.

mod db;
mod error;
mod manager;
mod store;
mod sync;

pub use db::ChatStore;
pub use error::CharlaError;
pub use manager::{truncate_title, ChatManager, ChatManagerConfig};
pub use store::ConversationStore;
pub use sync::MessageSyncEngine;

/// Result type for Charla operations.
pub type Result<T> = std::result::Result<T, CharlaError>;
