//! Conversation records and partial updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default title for a conversation created without one.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Default model identifier for new conversations.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// A chat conversation owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Display title (defaults to a placeholder)
    pub title: String,
    /// Model identifier used for this conversation
    pub model: String,
    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Whether web search is enabled for model calls
    #[serde(default)]
    pub web_search_enabled: bool,
    /// Soft-delete flag; archived conversations are excluded from the active list
    #[serde(default)]
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever a message is appended, so recency ordering stays correct
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation for a user with optional title/model overrides.
    pub fn new(user_id: Uuid, title: Option<String>, model: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: None,
            web_search_enabled: false,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a conversation. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

impl ConversationUpdate {
    /// True if no field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.model.is_none()
            && self.system_prompt.is_none()
            && self.web_search_enabled.is_none()
            && self.is_archived.is_none()
    }

    /// An update that only sets the archived flag.
    pub fn archive() -> Self {
        Self {
            is_archived: Some(true),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation_defaults() {
        let user_id = Uuid::new_v4();
        let conv = Conversation::new(user_id, None, None);

        assert_eq!(conv.user_id, user_id);
        assert_eq!(conv.title, DEFAULT_TITLE);
        assert_eq!(conv.model, DEFAULT_MODEL);
        assert!(!conv.is_archived);
        assert_eq!(conv.created_at, conv.updated_at);
    }

    #[test]
    fn test_update_is_empty() {
        assert!(ConversationUpdate::default().is_empty());
        assert!(!ConversationUpdate::archive().is_empty());
        assert_eq!(ConversationUpdate::archive().is_archived, Some(true));
    }
}
