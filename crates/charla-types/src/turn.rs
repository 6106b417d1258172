//! Live chat turns produced by the external streaming client.
//!
//! These mirror the shape the model SDK hands to the UI: a list of turns,
//! each made of typed parts, plus a stream status signal. The sync engine
//! consumes snapshots of this list and decides what to persist.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::MessageRole;

/// Status of the streaming chat client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Request sent, no tokens yet
    Submitted,
    /// Tokens are actively arriving for the last turn
    Streaming,
    /// No request in flight
    Ready,
}

/// One typed segment of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPart {
    /// Plain text content
    Text { text: String },
    /// Model reasoning trace
    Reasoning { text: String },
    /// A cited source URL
    SourceUrl { url: String },
    /// An attached file reference
    File { name: String, url: String },
}

/// A single turn in the live conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Identifier assigned by the streaming client; may be empty for
    /// synthetic turns, which are never persisted
    #[serde(default)]
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<TurnPart>,
}

impl ChatTurn {
    pub fn new(id: impl Into<String>, role: MessageRole) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
        }
    }

    /// A turn holding a single text part.
    pub fn text(id: impl Into<String>, role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            parts: vec![TurnPart::Text { text: text.into() }],
        }
    }

    /// First text-typed part, or "" if the turn has none.
    pub fn text_content(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| match p {
                TurnPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }

    /// Structured part list as JSON, for message metadata.
    pub fn parts_metadata(&self) -> Value {
        serde_json::json!({ "parts": self.parts, "turn_id": self.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_first_text_part() {
        let mut turn = ChatTurn::new("t1", MessageRole::Assistant);
        turn.parts.push(TurnPart::Reasoning {
            text: "thinking".into(),
        });
        turn.parts.push(TurnPart::Text {
            text: "answer".into(),
        });
        turn.parts.push(TurnPart::Text {
            text: "ignored".into(),
        });

        assert_eq!(turn.text_content(), "answer");
    }

    #[test]
    fn test_text_content_empty_without_text_part() {
        let turn = ChatTurn::new("t1", MessageRole::Assistant);
        assert_eq!(turn.text_content(), "");
    }

    #[test]
    fn test_parts_metadata_carries_turn_id() {
        let turn = ChatTurn::text("t42", MessageRole::User, "hola");
        let meta = turn.parts_metadata();
        assert_eq!(meta["turn_id"], "t42");
        assert_eq!(meta["parts"][0]["text"], "hola");
    }
}
