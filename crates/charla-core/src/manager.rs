//! Chat manager orchestrating persistence, the shared store, and events.

use crate::{CharlaError, ChatStore, ConversationStore, MessageSyncEngine, Result};
use charla_types::{
    ChatEvent, ChatTurn, Conversation, ConversationUpdate, Message, MessageRole, NewMessage,
    StreamStatus,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the chat manager.
#[derive(Debug, Clone)]
pub struct ChatManagerConfig {
    pub db_path: PathBuf,
    pub default_model: String,
}

impl Default for ChatManagerConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_default()
                .join("charla")
                .join("charla.db"),
            default_model: charla_types::DEFAULT_MODEL.to_string(),
        }
    }
}

/// Coordinates the durable store, the in-memory snapshot, the event bus,
/// and the message sync engine.
pub struct ChatManager {
    config: ChatManagerConfig,
    db: Arc<ChatStore>,
    store: Arc<ConversationStore>,
    engine: MessageSyncEngine,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatManager {
    /// Create a new chat manager.
    pub fn new(config: ChatManagerConfig) -> Result<Self> {
        let db = Arc::new(ChatStore::open(&config.db_path)?);
        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            config,
            db,
            store: Arc::new(ConversationStore::new()),
            engine: MessageSyncEngine::new(),
            event_tx,
        })
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    /// The shared in-memory store.
    pub fn store(&self) -> Arc<ConversationStore> {
        self.store.clone()
    }

    /// The durable store (for read-only access from routes).
    pub fn db(&self) -> Arc<ChatStore> {
        self.db.clone()
    }

    /// Spawn the in-process bus listener that reconciles locally created
    /// conversations into the shared store without a reload.
    pub fn spawn_event_listener(self: &Arc<Self>) {
        let manager = self.clone();
        let mut event_rx = self.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                if let ChatEvent::ConversationCreated { conversation } = event {
                    manager.store.apply_created(&conversation).await;
                }
            }
        });
    }

    /// Load a user's active conversation list, replacing the snapshot.
    ///
    /// On a storage error the previous snapshot is left in place and the
    /// error is both logged and returned to the caller.
    pub async fn load_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.store.set_loading(true).await;
        let result = self.db.list_active(user_id);
        self.store.set_loading(false).await;

        match result {
            Ok(conversations) => {
                self.store.set_conversations(conversations.clone()).await;
                Ok(conversations)
            }
            Err(e) => {
                error!(target: "charla::chat", "Failed to load conversations for {}: {}", user_id, e);
                Err(e)
            }
        }
    }

    /// Load a conversation's messages into the snapshot.
    pub async fn load_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.store.set_loading(true).await;
        let result = self.db.list_messages(conversation_id);
        self.store.set_loading(false).await;

        match result {
            Ok(messages) => {
                self.store.set_messages(messages.clone()).await;
                Ok(messages)
            }
            Err(e) => {
                error!(target: "charla::chat", "Failed to load messages for {}: {}", conversation_id, e);
                Err(e)
            }
        }
    }

    /// Create a conversation, select it, and broadcast the creation.
    pub async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
        model: Option<String>,
    ) -> Result<Conversation> {
        let model = model.or_else(|| Some(self.config.default_model.clone()));
        let conversation = Conversation::new(user_id, title, model);
        self.db.insert_conversation(&conversation)?;

        // Refresh the list from the source of truth, then select the new
        // conversation with an empty message view
        self.load_conversations(user_id).await?;
        self.select_conversation(conversation.clone()).await?;

        let _ = self.event_tx.send(ChatEvent::ConversationCreated {
            conversation: conversation.clone(),
        });

        info!(target: "charla::chat", "Created conversation {} for user {}", conversation.id, user_id);
        Ok(conversation)
    }

    /// Apply a partial update to a user's conversation.
    pub async fn update_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation> {
        let conversation = self
            .db
            .update_conversation(user_id, conversation_id, &update)?
            .ok_or(CharlaError::ConversationNotFound(conversation_id))?;

        self.store.apply_updated(&conversation).await;
        let _ = self.event_tx.send(ChatEvent::ConversationUpdated {
            conversation: conversation.clone(),
        });

        Ok(conversation)
    }

    /// Archive a conversation (soft delete). Its rows are kept; it just
    /// drops out of the active list.
    pub async fn archive_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation> {
        self.update_conversation(user_id, conversation_id, ConversationUpdate::archive())
            .await
    }

    /// Delete a conversation and all of its messages.
    pub async fn delete_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<()> {
        if !self.db.delete_conversation(user_id, conversation_id)? {
            return Err(CharlaError::ConversationNotFound(conversation_id));
        }

        self.store.remove(conversation_id).await;
        let _ = self.event_tx.send(ChatEvent::ConversationDeleted {
            user_id,
            conversation_id,
        });

        info!(target: "charla::chat", "Conversation {} deleted", conversation_id);
        Ok(())
    }

    /// Append a message, deduplicating on (conversation, role, content).
    ///
    /// An existing identical row is returned as-is without a new insert or
    /// a sequence bump. New rows bump the conversation's updated_at and
    /// are broadcast.
    pub async fn add_message(&self, new: NewMessage) -> Result<Message> {
        let (message, _inserted) = self.append_and_broadcast(new).await?;
        Ok(message)
    }

    async fn append_and_broadcast(&self, new: NewMessage) -> Result<(Message, bool)> {
        let conversation = self
            .db
            .get_conversation(new.conversation_id)?
            .ok_or(CharlaError::ConversationNotFound(new.conversation_id))?;

        let (message, inserted) = self.db.append_message(&new)?;

        if inserted {
            self.store.push_message(&message).await;
            let _ = self.event_tx.send(ChatEvent::MessageAppended {
                user_id: conversation.user_id,
                message: message.clone(),
            });
            debug!(
                target: "charla::chat",
                "Appended message {} (seq {}) to conversation {}",
                message.id,
                message.sequence,
                message.conversation_id
            );
        }

        Ok((message, inserted))
    }

    /// Select a conversation: set it current, load its messages, and reset
    /// the sync engine's persisted-id set.
    pub async fn select_conversation(&self, conversation: Conversation) -> Result<Vec<Message>> {
        let conversation_id = conversation.id;
        self.store.select(conversation, Vec::new()).await;
        self.engine.activate(Some(conversation_id)).await;
        self.load_messages(conversation_id).await
    }

    /// Persist a user-authored message, auto-creating a conversation when
    /// none is addressed or selected. The message is durable before the
    /// model request is dispatched; a creation failure aborts the send.
    pub async fn send_user_message(
        &self,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
        text: &str,
        metadata: Option<Value>,
    ) -> Result<(Conversation, Message)> {
        if text.is_empty() {
            return Err(CharlaError::EmptyMessage);
        }

        let conversation = match conversation_id {
            Some(id) => self
                .db
                .get_conversation(id)?
                .filter(|c| c.user_id == user_id)
                .ok_or(CharlaError::ConversationNotFound(id))?,
            None => match self.store.current_conversation().await {
                Some(current) if current.user_id == user_id => current,
                _ => {
                    self.create_conversation(user_id, Some(truncate_title(text)), None)
                        .await?
                }
            },
        };

        let mut new = NewMessage::new(conversation.id, MessageRole::User, text);
        new.metadata = metadata;
        let message = self.add_message(new).await?;

        Ok((conversation, message))
    }

    /// Reconcile a snapshot of the live turn list against the durable
    /// store, persisting each stabilized turn exactly once.
    ///
    /// Turns are processed strictly in order: each persistence attempt
    /// completes before the next turn is considered, keeping sequence
    /// assignment aligned with turn order. Returns the newly persisted
    /// messages.
    pub async fn sync_turns(
        &self,
        conversation_id: Uuid,
        turns: &[ChatTurn],
        status: StreamStatus,
    ) -> Result<Vec<Message>> {
        let conversation = self
            .db
            .get_conversation(conversation_id)?
            .ok_or(CharlaError::ConversationNotFound(conversation_id))?;

        self.engine.activate(Some(conversation_id)).await;

        let mut persisted = Vec::new();
        let tail_id = turns.last().map(|t| t.id.as_str());

        for turn in turns {
            let is_tail = tail_id == Some(turn.id.as_str());
            if !self.engine.should_persist(turn, is_tail, status).await {
                continue;
            }

            let mut new = NewMessage::new(conversation_id, turn.role, turn.text_content())
                .with_metadata(turn.parts_metadata());
            if turn.role == MessageRole::Assistant {
                new.model_used = Some(conversation.model.clone());
            }

            match self.append_and_broadcast(new).await {
                Ok((message, inserted)) => {
                    self.engine.mark_persisted(&turn.id).await;
                    if inserted {
                        persisted.push(message);
                    }
                }
                Err(e) => {
                    let attempts = self.engine.record_failure(&turn.id).await;
                    warn!(
                        target: "charla::sync",
                        "Failed to persist turn {} (attempt {}): {}",
                        turn.id,
                        attempts,
                        e
                    );
                }
            }
        }

        Ok(persisted)
    }
}

/// Derive a conversation title from the first message: at most 50
/// characters, ellipsized beyond that.
pub fn truncate_title(text: &str) -> String {
    const MAX_LEN: usize = 50;
    if text.chars().count() <= MAX_LEN {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(MAX_LEN).collect();
        format!("{}...", prefix)
    }
}
