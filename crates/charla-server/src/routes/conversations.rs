//! Conversation management routes.

use crate::auth::UserId;
use crate::routes::error_response;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use charla_types::{Conversation, ConversationUpdate, Message};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
}

/// List the user's active (non-archived) conversations, most recently
/// updated first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
) -> Result<Json<ConversationListResponse>, (StatusCode, String)> {
    let conversations = state
        .chat_manager
        .load_conversations(user_id)
        .await
        .map_err(error_response)?;

    Ok(Json(ConversationListResponse { conversations }))
}

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let conversation = state
        .chat_manager
        .create_conversation(user_id, req.title, req.model)
        .await
        .map_err(error_response)?;

    Ok(Json(conversation))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let conversation = state
        .chat_manager
        .db()
        .get_conversation(id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .filter(|c| c.user_id == user_id)
        .ok_or((StatusCode::NOT_FOUND, "Conversation not found".to_string()))?;

    Ok(Json(conversation))
}

#[derive(Deserialize)]
pub struct UpdateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub web_search_enabled: Option<bool>,
    #[serde(default)]
    pub is_archived: Option<bool>,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateConversationRequest>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let update = ConversationUpdate {
        title: req.title,
        model: req.model,
        system_prompt: req.system_prompt,
        web_search_enabled: req.web_search_enabled,
        is_archived: req.is_archived,
    };

    if update.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No fields to update".to_string()));
    }

    let conversation = state
        .chat_manager
        .update_conversation(user_id, id, update)
        .await
        .map_err(error_response)?;

    Ok(Json(conversation))
}

/// Delete a conversation and all of its messages permanently.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .chat_manager
        .delete_conversation(user_id, id)
        .await
        .map_err(error_response)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Archive a conversation. It keeps its rows but drops out of the
/// active list.
pub async fn archive(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let conversation = state
        .chat_manager
        .archive_conversation(user_id, id)
        .await
        .map_err(error_response)?;

    info!(target: "charla::api", "Conversation {} archived", id);
    Ok(Json(conversation))
}

#[derive(Serialize)]
pub struct SelectConversationResponse {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Make a conversation current: loads its message history and resets
/// the turn-sync state for the new context.
pub async fn select(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<SelectConversationResponse>, (StatusCode, String)> {
    let conversation = state
        .chat_manager
        .db()
        .get_conversation(id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .filter(|c| c.user_id == user_id)
        .ok_or((StatusCode::NOT_FOUND, "Conversation not found".to_string()))?;

    let messages = state
        .chat_manager
        .select_conversation(conversation.clone())
        .await
        .map_err(error_response)?;

    Ok(Json(SelectConversationResponse {
        conversation,
        messages,
    }))
}
