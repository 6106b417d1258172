//! Realtime change feed over WebSocket.
//!
//! Clients subscribe to `/ws/events` and receive the change events for
//! their own conversations (creations, updates, deletions, appended
//! messages). A client reacting to a conversation change typically
//! reloads its list; reconnection is left to the client.

use crate::auth::UserId;
use crate::state::AppState;
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

/// Handler for the events WebSocket upgrade.
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_events_socket(socket, state, user_id).await {
            tracing::error!(target: "charla::ws", "Events WebSocket error: {}", e);
        }
    })
}

async fn handle_events_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: uuid::Uuid,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut event_rx = state.chat_manager.subscribe();

    tracing::info!(target: "charla::ws", "Events client connected for user {}", user_id);

    // Forward this user's events to the socket
    let mut send_task = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            if event.user_id() != user_id {
                continue;
            }
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                tracing::debug!(target: "charla::ws", "Events client disconnected");
                break;
            }
        }
    });

    // Handle incoming messages (keepalive pings, close)
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Ping(_) => {
                    // Pong is handled automatically by axum
                }
                Message::Close(_) => {
                    tracing::debug!(target: "charla::ws", "Events client closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    tracing::info!(target: "charla::ws", "Events client disconnected for user {}", user_id);
    Ok(())
}
