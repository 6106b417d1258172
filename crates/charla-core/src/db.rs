//! SQLite persistence for conversations and messages.

use crate::{CharlaError, Result};
use charla_types::{Conversation, ConversationUpdate, Message, MessageRole, NewMessage};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// How many times to retry a sequence-number insert that loses the
/// read-then-insert race against another writer on the same database.
const SEQUENCE_RETRY_LIMIT: u32 = 3;

/// SQLite-based store for conversations and messages.
pub struct ChatStore {
    conn: Mutex<Connection>,
}

impl ChatStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT 'New conversation',
                model TEXT NOT NULL DEFAULT 'openai/gpt-4o',
                system_prompt TEXT,
                web_search_enabled INTEGER NOT NULL DEFAULT 0,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_user_id
                ON conversations(user_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_updated_at
                ON conversations(updated_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT,
                sequence INTEGER NOT NULL,
                model_used TEXT,
                tokens_used INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation_id
                ON messages(conversation_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_conversation_seq
                ON messages(conversation_id, sequence);
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Conversation CRUD
    // =========================================================================

    /// Insert a new conversation.
    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO conversations (
                id, user_id, title, model, system_prompt, web_search_enabled,
                is_archived, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                conversation.id.to_string(),
                conversation.user_id.to_string(),
                conversation.title,
                conversation.model,
                conversation.system_prompt,
                conversation.web_search_enabled as i32,
                conversation.is_archived as i32,
                conversation.created_at.to_rfc3339(),
                conversation.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a conversation by ID.
    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let conversation = conn
            .query_row(
                "SELECT * FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| Self::row_to_conversation(row),
            )
            .optional()?;
        Ok(conversation)
    }

    /// List a user's non-archived conversations, most recently updated first.
    pub fn list_active(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM conversations
            WHERE user_id = ?1 AND is_archived = 0
            ORDER BY updated_at DESC
            "#,
        )?;
        let conversations = stmt
            .query_map(params![user_id.to_string()], |row| {
                Self::row_to_conversation(row)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    /// Apply a partial update to a user's conversation.
    ///
    /// Returns the updated row, or None if the conversation does not exist
    /// or belongs to a different user.
    pub fn update_conversation(
        &self,
        user_id: Uuid,
        id: Uuid,
        update: &ConversationUpdate,
    ) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT * FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id.to_string()],
                |row| Self::row_to_conversation(row),
            )
            .optional()?;

        let Some(mut conversation) = existing else {
            return Ok(None);
        };

        if let Some(title) = &update.title {
            conversation.title = title.clone();
        }
        if let Some(model) = &update.model {
            conversation.model = model.clone();
        }
        if let Some(system_prompt) = &update.system_prompt {
            conversation.system_prompt = Some(system_prompt.clone());
        }
        if let Some(web_search) = update.web_search_enabled {
            conversation.web_search_enabled = web_search;
        }
        if let Some(archived) = update.is_archived {
            conversation.is_archived = archived;
        }
        conversation.updated_at = chrono::Utc::now();

        conn.execute(
            r#"
            UPDATE conversations SET
                title = ?1,
                model = ?2,
                system_prompt = ?3,
                web_search_enabled = ?4,
                is_archived = ?5,
                updated_at = ?6
            WHERE id = ?7 AND user_id = ?8
            "#,
            params![
                conversation.title,
                conversation.model,
                conversation.system_prompt,
                conversation.web_search_enabled as i32,
                conversation.is_archived as i32,
                conversation.updated_at.to_rfc3339(),
                id.to_string(),
                user_id.to_string(),
            ],
        )?;

        Ok(Some(conversation))
    }

    /// Delete a user's conversation and all of its messages.
    ///
    /// Returns true if a row was removed.
    pub fn delete_conversation(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // Messages first: foreign_keys may be off on older database files
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id.to_string()],
        )?;
        let deleted = conn.execute(
            "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    /// Bump a conversation's updated_at so recency ordering stays correct.
    pub fn touch_conversation(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Message CRUD
    // =========================================================================

    /// Find an existing message with the same (conversation, role, content).
    pub fn find_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        Self::find_message_locked(&conn, conversation_id, role, content)
    }

    fn find_message_locked(
        conn: &Connection,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<Option<Message>> {
        let message = conn
            .query_row(
                r#"
                SELECT * FROM messages
                WHERE conversation_id = ?1 AND role = ?2 AND content = ?3
                LIMIT 1
                "#,
                params![conversation_id.to_string(), role.as_str(), content],
                |row| Self::row_to_message(row),
            )
            .optional()?;
        Ok(message)
    }

    /// Append a message, deduplicating on (conversation, role, content).
    ///
    /// Returns (message, inserted). When an identical row already exists it
    /// is returned unchanged with inserted = false and the sequence counter
    /// is not advanced. New rows get sequence = MAX(sequence) + 1 (1 for the
    /// first message); the unique (conversation, sequence) index plus a
    /// bounded retry covers the read-then-insert race against writers in
    /// other processes. Successful inserts bump the conversation's
    /// updated_at.
    pub fn append_message(&self, new: &NewMessage) -> Result<(Message, bool)> {
        let conn = self.conn.lock().unwrap();

        if let Some(existing) =
            Self::find_message_locked(&conn, new.conversation_id, new.role, &new.content)?
        {
            return Ok((existing, false));
        }

        let metadata_json = new
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m))
            .transpose()?;

        for attempt in 1..=SEQUENCE_RETRY_LIMIT {
            let sequence = Self::max_sequence_locked(&conn, new.conversation_id)? + 1;
            let now = chrono::Utc::now();
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id: new.conversation_id,
                role: new.role,
                content: new.content.clone(),
                metadata: new.metadata.clone(),
                sequence,
                model_used: new.model_used.clone(),
                tokens_used: new.tokens_used,
                created_at: now,
                updated_at: now,
            };

            let inserted = conn.execute(
                r#"
                INSERT INTO messages (
                    id, conversation_id, role, content, metadata, sequence,
                    model_used, tokens_used, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.role.as_str(),
                    message.content,
                    metadata_json,
                    message.sequence,
                    message.model_used,
                    message.tokens_used,
                    message.created_at.to_rfc3339(),
                    message.updated_at.to_rfc3339(),
                ],
            );

            match inserted {
                Ok(_) => {
                    conn.execute(
                        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                        params![now.to_rfc3339(), message.conversation_id.to_string()],
                    )?;
                    return Ok((message, true));
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    tracing::debug!(
                        target: "charla::db",
                        "Sequence {} taken for conversation {} (attempt {})",
                        sequence,
                        new.conversation_id,
                        attempt
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CharlaError::SequenceContention(new.conversation_id))
    }

    /// List a conversation's messages in sequence order.
    pub fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = ?1
            ORDER BY sequence ASC
            "#,
        )?;
        let messages = stmt
            .query_map(params![conversation_id.to_string()], |row| {
                Self::row_to_message(row)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Highest sequence number in a conversation (0 if it has no messages).
    pub fn max_sequence(&self, conversation_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Self::max_sequence_locked(&conn, conversation_id)
    }

    fn max_sequence_locked(conn: &Connection, conversation_id: Uuid) -> Result<i64> {
        let max_seq: Option<i64> = conn
            .query_row(
                "SELECT MAX(sequence) FROM messages WHERE conversation_id = ?1",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(max_seq.unwrap_or(0))
    }

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        let id: String = row.get("id")?;
        let user_id: String = row.get("user_id")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Conversation {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            user_id: Uuid::parse_str(&user_id).unwrap_or_default(),
            title: row.get("title")?,
            model: row.get("model")?,
            system_prompt: row.get("system_prompt")?,
            web_search_enabled: row.get::<_, i32>("web_search_enabled")? != 0,
            is_archived: row.get::<_, i32>("is_archived")? != 0,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_default(),
            updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_default(),
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let id: String = row.get("id")?;
        let conversation_id: String = row.get("conversation_id")?;
        let role: String = row.get("role")?;
        let metadata_json: Option<String> = row.get("metadata")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Message {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            conversation_id: Uuid::parse_str(&conversation_id).unwrap_or_default(),
            role: MessageRole::parse(&role).unwrap_or(MessageRole::System),
            content: row.get("content")?,
            metadata: metadata_json.and_then(|m| serde_json::from_str(&m).ok()),
            sequence: row.get("sequence")?,
            model_used: row.get("model_used")?,
            tokens_used: row.get("tokens_used")?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_default(),
            updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_types::ConversationUpdate;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, ChatStore) {
        let dir = TempDir::new().unwrap();
        let store = ChatStore::open(&dir.path().join("charla.db")).unwrap();
        (dir, store)
    }

    fn make_conversation(store: &ChatStore, user_id: Uuid) -> Conversation {
        let conversation = Conversation::new(user_id, None, None);
        store.insert_conversation(&conversation).unwrap();
        conversation
    }

    #[test]
    fn test_sequences_are_gapless_in_append_order() {
        let (_dir, store) = open_store();
        let conversation = make_conversation(&store, Uuid::new_v4());

        for i in 1..=5 {
            let (msg, inserted) = store
                .append_message(&NewMessage::new(
                    conversation.id,
                    MessageRole::User,
                    format!("message {}", i),
                ))
                .unwrap();
            assert!(inserted);
            assert_eq!(msg.sequence, i);
        }

        let messages = store.list_messages(conversation.id).unwrap();
        let sequences: Vec<i64> = messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_duplicate_content_returns_existing_row() {
        let (_dir, store) = open_store();
        let conversation = make_conversation(&store, Uuid::new_v4());

        let new = NewMessage::new(conversation.id, MessageRole::User, "hola");
        let (first, inserted) = store.append_message(&new).unwrap();
        assert!(inserted);

        let (second, inserted) = store.append_message(&new).unwrap();
        assert!(!inserted);
        assert_eq!(second.id, first.id);
        assert_eq!(store.max_sequence(conversation.id).unwrap(), 1);
    }

    #[test]
    fn test_same_content_different_role_is_not_a_duplicate() {
        let (_dir, store) = open_store();
        let conversation = make_conversation(&store, Uuid::new_v4());

        let (_, inserted) = store
            .append_message(&NewMessage::new(conversation.id, MessageRole::User, "hola"))
            .unwrap();
        assert!(inserted);

        let (msg, inserted) = store
            .append_message(&NewMessage::new(
                conversation.id,
                MessageRole::Assistant,
                "hola",
            ))
            .unwrap();
        assert!(inserted);
        assert_eq!(msg.sequence, 2);
    }

    #[test]
    fn test_append_bumps_conversation_updated_at() {
        let (_dir, store) = open_store();
        let conversation = make_conversation(&store, Uuid::new_v4());
        let before = store
            .get_conversation(conversation.id)
            .unwrap()
            .unwrap()
            .updated_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .append_message(&NewMessage::new(conversation.id, MessageRole::User, "hola"))
            .unwrap();

        let after = store
            .get_conversation(conversation.id)
            .unwrap()
            .unwrap()
            .updated_at;
        assert!(after > before);
    }

    #[test]
    fn test_list_active_excludes_archived_and_orders_by_recency() {
        let (_dir, store) = open_store();
        let user_id = Uuid::new_v4();
        let older = make_conversation(&store, user_id);
        let newer = make_conversation(&store, user_id);
        let archived = make_conversation(&store, user_id);

        store
            .update_conversation(user_id, archived.id, &ConversationUpdate::archive())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.touch_conversation(newer.id).unwrap();

        let active = store.list_active(user_id).unwrap();
        let ids: Vec<Uuid> = active.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        // Archived rows still exist
        let archived_row = store.get_conversation(archived.id).unwrap().unwrap();
        assert!(archived_row.is_archived);
    }

    #[test]
    fn test_list_active_scoped_to_user() {
        let (_dir, store) = open_store();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();
        make_conversation(&store, user_a);
        make_conversation(&store, user_b);

        assert_eq!(store.list_active(user_a).unwrap().len(), 1);
        assert_eq!(store.list_active(user_b).unwrap().len(), 1);
    }

    #[test]
    fn test_update_conversation_requires_owner() {
        let (_dir, store) = open_store();
        let owner = Uuid::new_v4();
        let conversation = make_conversation(&store, owner);

        let update = ConversationUpdate {
            title: Some("renamed".into()),
            ..Default::default()
        };

        let denied = store
            .update_conversation(Uuid::new_v4(), conversation.id, &update)
            .unwrap();
        assert!(denied.is_none());

        let updated = store
            .update_conversation(owner, conversation.id, &update)
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "renamed");
    }

    #[test]
    fn test_delete_conversation_removes_messages() {
        let (_dir, store) = open_store();
        let user_id = Uuid::new_v4();
        let conversation = make_conversation(&store, user_id);
        store
            .append_message(&NewMessage::new(conversation.id, MessageRole::User, "hola"))
            .unwrap();

        assert!(store.delete_conversation(user_id, conversation.id).unwrap());
        assert!(store.get_conversation(conversation.id).unwrap().is_none());
        assert!(store.list_messages(conversation.id).unwrap().is_empty());
    }

    #[test]
    fn test_message_metadata_round_trip() {
        let (_dir, store) = open_store();
        let conversation = make_conversation(&store, Uuid::new_v4());

        let metadata = serde_json::json!({"files": [{"name": "notes.txt"}]});
        store
            .append_message(
                &NewMessage::new(conversation.id, MessageRole::User, "see attachment")
                    .with_metadata(metadata.clone()),
            )
            .unwrap();

        let messages = store.list_messages(conversation.id).unwrap();
        assert_eq!(messages[0].metadata, Some(metadata));
    }

    /// Simulates a competing writer that claims every sequence number
    /// first: a trigger inserts a conflicting row at NEW.sequence before
    /// each insert, so the unique index rejects every attempt.
    fn install_sequence_thief(db_path: &Path) -> Connection {
        let raw = Connection::open(db_path).unwrap();
        raw.execute_batch(
            r#"
            CREATE TRIGGER steal_sequence BEFORE INSERT ON messages
            BEGIN
                INSERT INTO messages (
                    id, conversation_id, role, content, sequence,
                    created_at, updated_at
                ) VALUES (
                    hex(randomblob(16)), NEW.conversation_id, 'user',
                    'interloper ' || hex(randomblob(8)), NEW.sequence,
                    NEW.created_at, NEW.updated_at
                );
            END;
            "#,
        )
        .unwrap();
        raw
    }

    #[test]
    fn test_sequence_contention_surfaces_after_retries() {
        let (dir, store) = open_store();
        let conversation = make_conversation(&store, Uuid::new_v4());
        let _raw = install_sequence_thief(&dir.path().join("charla.db"));

        let result =
            store.append_message(&NewMessage::new(conversation.id, MessageRole::User, "hola"));

        match result {
            Err(CharlaError::SequenceContention(id)) => assert_eq!(id, conversation.id),
            other => panic!("expected sequence contention, got {:?}", other),
        }
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn distinct_contents_get_contiguous_sequences(
                contents in proptest::collection::hash_set("[a-z]{1,12}", 1..20)
            ) {
                let (_dir, store) = open_store();
                let conversation = make_conversation(&store, Uuid::new_v4());

                for content in &contents {
                    store
                        .append_message(&NewMessage::new(
                            conversation.id,
                            MessageRole::User,
                            content.clone(),
                        ))
                        .unwrap();
                }

                let sequences: Vec<i64> = store
                    .list_messages(conversation.id)
                    .unwrap()
                    .iter()
                    .map(|m| m.sequence)
                    .collect();
                let expected: Vec<i64> = (1..=contents.len() as i64).collect();
                prop_assert_eq!(sequences, expected);
            }
        }
    }
}
