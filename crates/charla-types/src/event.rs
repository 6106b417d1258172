//! Event bus payloads for cross-view synchronization.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Conversation, Message};

/// Change events published by the chat manager.
///
/// Every variant carries the owning user id so subscribers (in-process
/// stores and the realtime WebSocket feed) can filter to their user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A conversation was created and persisted
    ConversationCreated { conversation: Conversation },
    /// A conversation's fields changed (rename, archive, model switch)
    ConversationUpdated { conversation: Conversation },
    /// A conversation and its messages were removed
    ConversationDeleted { user_id: Uuid, conversation_id: Uuid },
    /// A message row was appended to a conversation
    MessageAppended { user_id: Uuid, message: Message },
}

impl ChatEvent {
    /// The user this event belongs to.
    pub fn user_id(&self) -> Uuid {
        match self {
            ChatEvent::ConversationCreated { conversation }
            | ChatEvent::ConversationUpdated { conversation } => conversation.user_id,
            ChatEvent::ConversationDeleted { user_id, .. } => *user_id,
            ChatEvent::MessageAppended { user_id, .. } => *user_id,
        }
    }
}
