//! Shared application state.

use crate::config::Config;
use charla_core::{ChatManager, ChatManagerConfig};
use std::sync::Arc;

/// Shared application state.
///
/// The manager's in-memory snapshot (conversation list, current
/// selection, sync-engine bookkeeping) models one active client context,
/// matching the single-user deployments this server targets. HTTP
/// handlers read from the database, which is scoped per user on every
/// query, so concurrent users stay isolated over the API either way.
pub struct AppState {
    pub chat_manager: Arc<ChatManager>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> charla_core::Result<Self> {
        let manager_config = ChatManagerConfig {
            db_path: config.db_path.clone(),
            default_model: config.default_model.clone(),
        };

        let chat_manager = Arc::new(ChatManager::new(manager_config)?);
        chat_manager.spawn_event_listener();

        Ok(Self {
            chat_manager,
            config,
        })
    }
}
