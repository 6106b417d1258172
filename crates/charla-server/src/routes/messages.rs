//! Message routes: history, direct appends, live turn sync, and the
//! send flow.

use crate::auth::UserId;
use crate::routes::error_response;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use charla_types::{ChatTurn, Conversation, Message, MessageRole, NewMessage, StreamStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Look up a conversation and verify ownership.
fn owned_conversation(
    state: &AppState,
    user_id: Uuid,
    conversation_id: Uuid,
) -> Result<Conversation, (StatusCode, String)> {
    state
        .chat_manager
        .db()
        .get_conversation(conversation_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .filter(|c| c.user_id == user_id)
        .ok_or((StatusCode::NOT_FOUND, "Conversation not found".to_string()))
}

#[derive(Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<Message>,
}

/// List a conversation's messages in sequence order.
pub async fn list(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageListResponse>, (StatusCode, String)> {
    owned_conversation(&state, user_id, id)?;

    let messages = state
        .chat_manager
        .db()
        .list_messages(id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(MessageListResponse { messages }))
}

#[derive(Deserialize)]
pub struct AddMessageRequest {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub model_used: Option<String>,
}

/// Append a message directly. Identical (role, content) rows are
/// deduplicated; the existing row comes back unchanged.
pub async fn add(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMessageRequest>,
) -> Result<Json<Message>, (StatusCode, String)> {
    owned_conversation(&state, user_id, id)?;

    let mut new = NewMessage::new(id, req.role, &req.content);
    new.metadata = req.metadata;
    new.model_used = req.model_used;

    let message = state
        .chat_manager
        .add_message(new)
        .await
        .map_err(error_response)?;

    Ok(Json(message))
}

#[derive(Deserialize)]
pub struct SyncTurnsRequest {
    pub turns: Vec<ChatTurn>,
    pub status: StreamStatus,
}

#[derive(Serialize)]
pub struct SyncTurnsResponse {
    pub persisted: Vec<Message>,
}

/// Reconcile a snapshot of the streaming client's turn list against the
/// durable store. Safe to call repeatedly with overlapping snapshots;
/// each turn is persisted at most once.
pub async fn sync_turns(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
    Json(req): Json<SyncTurnsRequest>,
) -> Result<Json<SyncTurnsResponse>, (StatusCode, String)> {
    owned_conversation(&state, user_id, id)?;

    let persisted = state
        .chat_manager
        .sync_turns(id, &req.turns, req.status)
        .await
        .map_err(error_response)?;

    debug!(
        target: "charla::api",
        "Synced {} turns into conversation {} ({} persisted)",
        req.turns.len(),
        id,
        persisted.len()
    );

    Ok(Json(SyncTurnsResponse { persisted }))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub conversation: Conversation,
    pub message: Message,
}

/// Persist a user message before the model request goes out. When no
/// conversation is addressed a new one is created, titled from the
/// message text.
pub async fn send(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, (StatusCode, String)> {
    let (conversation, message) = state
        .chat_manager
        .send_user_message(user_id, req.conversation_id, &req.text, req.metadata)
        .await
        .map_err(error_response)?;

    Ok(Json(SendMessageResponse {
        conversation,
        message,
    }))
}
