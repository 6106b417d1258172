//! Charla server library - HTTP/WebSocket server for the chat backend.
//!
//! This library provides the HTTP routes, WebSocket handler, and application
//! state for the Charla server. It's separated from main.rs to enable
//! integration testing.

pub mod auth;
pub mod config;
pub mod events_ws;
pub mod logging;
pub mod routes;
pub mod state;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use state::AppState;
use std::sync::Arc;

/// Build the full application router (shared between main and tests).
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Conversation management
        .route("/conversations", get(routes::conversations::list))
        .route("/conversations", post(routes::conversations::create))
        .route("/conversations/{id}", get(routes::conversations::get))
        .route("/conversations/{id}", patch(routes::conversations::update))
        .route("/conversations/{id}", delete(routes::conversations::remove))
        .route(
            "/conversations/{id}/archive",
            post(routes::conversations::archive),
        )
        .route(
            "/conversations/{id}/select",
            post(routes::conversations::select),
        )
        // Messages
        .route("/conversations/{id}/messages", get(routes::messages::list))
        .route("/conversations/{id}/messages", post(routes::messages::add))
        // Live turn snapshots from the streaming client
        .route("/conversations/{id}/turns", post(routes::messages::sync_turns))
        // Message send flow (auto-creates a conversation when needed)
        .route("/chat/send", post(routes::messages::send))
        .route("/health", get(routes::health));

    let ws_routes = Router::new().route("/events", get(events_ws::upgrade));

    Router::new()
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .with_state(state)
}
