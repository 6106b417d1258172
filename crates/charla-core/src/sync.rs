//! Reconciliation state for persisting streamed chat turns exactly once.
//!
//! The streaming client re-delivers the full turn list on every pass, so
//! the engine keeps a per-conversation set of already-persisted turn ids
//! and decides, per turn, whether a durable row should be written. The
//! decisions here are pure bookkeeping; the actual writes go through
//! [`crate::ChatManager::sync_turns`].

use charla_types::{ChatTurn, MessageRole, StreamStatus};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Give up on a turn after this many failed persistence attempts.
const MAX_PERSIST_ATTEMPTS: u32 = 3;

#[derive(Debug, Default)]
struct SyncInner {
    /// Conversation the persisted-id set belongs to
    conversation: Option<Uuid>,
    /// Turn ids already stored durably
    persisted: HashSet<String>,
    /// Failed attempt counts for turns that hit non-duplicate errors
    attempts: HashMap<String, u32>,
}

/// Tracks which streamed turns have been persisted for the active
/// conversation.
#[derive(Debug, Default)]
pub struct MessageSyncEngine {
    inner: Mutex<SyncInner>,
}

impl MessageSyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the engine at a conversation. Switching conversations clears
    /// the persisted-id set and the retry counters: a turn id seen in the
    /// previous conversation may legitimately be persisted again.
    pub async fn activate(&self, conversation: Option<Uuid>) {
        let mut inner = self.inner.lock().await;
        if inner.conversation != conversation {
            inner.conversation = conversation;
            inner.persisted.clear();
            inner.attempts.clear();
        }
    }

    /// Decide whether a turn should be persisted on this pass.
    ///
    /// Skips turns without an id, turns already persisted, non user/
    /// assistant roles, the actively-streaming assistant tail, assistant
    /// turns with no text yet, and turns that exhausted their retry budget.
    pub async fn should_persist(
        &self,
        turn: &ChatTurn,
        is_tail: bool,
        status: StreamStatus,
    ) -> bool {
        if turn.id.is_empty() {
            return false;
        }

        let inner = self.inner.lock().await;
        if inner.persisted.contains(&turn.id) {
            return false;
        }
        if inner.attempts.get(&turn.id).copied().unwrap_or(0) >= MAX_PERSIST_ATTEMPTS {
            return false;
        }
        drop(inner);

        match turn.role {
            MessageRole::User => true,
            MessageRole::Assistant => {
                if status == StreamStatus::Streaming && is_tail {
                    // Still being produced; wait until it stabilizes
                    return false;
                }
                !turn.text_content().is_empty()
            }
            MessageRole::System => false,
        }
    }

    /// Record that a turn id is durably stored (insert or benign duplicate).
    pub async fn mark_persisted(&self, turn_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.attempts.remove(turn_id);
        inner.persisted.insert(turn_id.to_string());
    }

    /// Record a failed persistence attempt. Returns the attempt count so
    /// far; the turn stays unmarked and is retried on later passes until
    /// the budget runs out.
    pub async fn record_failure(&self, turn_id: &str) -> u32 {
        let mut inner = self.inner.lock().await;
        let count = inner.attempts.entry(turn_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Number of turn ids recorded as persisted (for tests/diagnostics).
    pub async fn persisted_count(&self) -> usize {
        self.inner.lock().await.persisted.len()
    }
}
