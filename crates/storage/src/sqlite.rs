//! SQLite backend for chat persistence.
//!
//! Uses a single SQLite database file with three tables:
//! - `chats` — conversation threads
//! - `messages` — ordered messages; the `seq` rowid is the creation order
//! - `chat_summaries` — one rolling summary row per chat
//!
//! The compaction commit (summary replace + flag flips) runs inside one
//! transaction with commit-time re-validation of the batch.

use async_trait::async_trait;
use chrono::Utc;
use spindle_core::error::StorageError;
use spindle_core::message::{Chat, ChatId, ChatSummary, Message, MessageToolCall, Role};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ChatStore;

/// A production SQLite chat store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a file path.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite chat store initialized at {path}");
        Ok(store)
    }

    /// Run schema migrations — creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id          TEXT PRIMARY KEY,
                title       TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("chats table: {e}")))?;

        // seq doubles as the creation order: monotonic per store, shared
        // timestamps in one turn cannot reorder it.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                chat_id      TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                role         TEXT NOT NULL,
                content      TEXT NOT NULL,
                tool_calls   TEXT NOT NULL DEFAULT '[]',
                tool_call_id TEXT,
                summarized   INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_raw
             ON messages(chat_id, summarized, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("messages index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_summaries (
                chat_id     TEXT PRIMARY KEY REFERENCES chats(id) ON DELETE CASCADE,
                content     TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("chat_summaries table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn role_from_str(s: &str) -> Result<Role, StorageError> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(StorageError::QueryFailed(format!("unknown role: {other}"))),
        }
    }

    /// Parse a `Message` from a SQLite row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StorageError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StorageError::QueryFailed(format!("id column: {e}")))?;
        let chat_id: String = row
            .try_get("chat_id")
            .map_err(|e| StorageError::QueryFailed(format!("chat_id column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StorageError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StorageError::QueryFailed(format!("content column: {e}")))?;
        let tool_calls_json: String = row
            .try_get("tool_calls")
            .map_err(|e| StorageError::QueryFailed(format!("tool_calls column: {e}")))?;
        let tool_call_id: Option<String> = row
            .try_get("tool_call_id")
            .map_err(|e| StorageError::QueryFailed(format!("tool_call_id column: {e}")))?;
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| StorageError::QueryFailed(format!("seq column: {e}")))?;
        let summarized: bool = row
            .try_get("summarized")
            .map_err(|e| StorageError::QueryFailed(format!("summarized column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StorageError::QueryFailed(format!("created_at column: {e}")))?;

        let tool_calls: Vec<MessageToolCall> =
            serde_json::from_str(&tool_calls_json).unwrap_or_default();

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Message {
            id,
            chat_id: ChatId(chat_id),
            role: Self::role_from_str(&role)?,
            content,
            tool_calls,
            tool_call_id,
            seq,
            summarized,
            created_at,
        })
    }

    fn row_to_chat(row: &sqlx::sqlite::SqliteRow) -> Result<Chat, StorageError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StorageError::QueryFailed(format!("id column: {e}")))?;
        let title: Option<String> = row
            .try_get("title")
            .map_err(|e| StorageError::QueryFailed(format!("title column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StorageError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| StorageError::QueryFailed(format!("updated_at column: {e}")))?;

        Ok(Chat {
            id: ChatId(id),
            title,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_chat(&self, title: Option<&str>) -> Result<Chat, StorageError> {
        let chat = Chat::new(title.map(String::from));
        sqlx::query("INSERT INTO chats (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&chat.id.0)
            .bind(&chat.title)
            .bind(chat.created_at.to_rfc3339())
            .bind(chat.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Storage(format!("INSERT chat failed: {e}")))?;
        Ok(chat)
    }

    async fn get_chat(&self, id: &ChatId) -> Result<Option<Chat>, StorageError> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("GET chat: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_chat(r)?)),
            None => Ok(None),
        }
    }

    async fn append_message(&self, mut message: Message) -> Result<Message, StorageError> {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }
        let tool_calls_json = serde_json::to_string(&message.tool_calls)
            .map_err(|e| StorageError::Storage(format!("tool_calls serialization: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, role, content, tool_calls, tool_call_id, summarized, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&message.id)
        .bind(&message.chat_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&tool_calls_json)
        .bind(&message.tool_call_id)
        .bind(message.summarized)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Storage(format!("INSERT message failed: {e}")))?;

        message.seq = result.last_insert_rowid();

        sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(&message.chat_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Storage(format!("touch chat failed: {e}")))?;

        Ok(message)
    }

    async fn unsummarized_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE chat_id = ?1 AND summarized = 0 ORDER BY seq ASC",
        )
        .bind(&chat_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("unsummarized scan: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn count_unsummarized_turns(&self, chat_id: &ChatId) -> Result<usize, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS cnt FROM messages
            WHERE chat_id = ?1 AND summarized = 0 AND role IN ('user', 'assistant')
            "#,
        )
        .bind(&chat_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("turn count: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| StorageError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(cnt as usize)
    }

    async fn oldest_unsummarized_turns(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE chat_id = ?1 AND summarized = 0 AND role IN ('user', 'assistant')
            ORDER BY seq ASC
            LIMIT ?2
            "#,
        )
        .bind(&chat_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("oldest batch: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn summary(&self, chat_id: &ChatId) -> Result<Option<ChatSummary>, StorageError> {
        let row = sqlx::query("SELECT * FROM chat_summaries WHERE chat_id = ?1")
            .bind(&chat_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("summary read: {e}")))?;

        let Some(row) = row else { return Ok(None) };

        let content: String = row
            .try_get("content")
            .map_err(|e| StorageError::QueryFailed(format!("content column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| StorageError::QueryFailed(format!("updated_at column: {e}")))?;

        Ok(Some(ChatSummary {
            chat_id: chat_id.clone(),
            content,
            updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn apply_compaction(
        &self,
        chat_id: &ChatId,
        summary: &str,
        message_ids: &[String],
    ) -> Result<(), StorageError> {
        if message_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Storage(format!("begin compaction tx: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO chat_summaries (chat_id, content, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(chat_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&chat_id.0)
        .bind(summary)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Storage(format!("summary upsert: {e}")))?;

        // Re-validate the batch at commit time: every id must still be an
        // unsummarized row of this chat. A shortfall means a concurrent
        // delete or compaction won the race — roll everything back.
        let placeholders: Vec<String> = (0..message_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let sql = format!(
            "UPDATE messages SET summarized = 1
             WHERE chat_id = ?1 AND summarized = 0 AND id IN ({})",
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(&chat_id.0);
        for id in message_ids {
            query = query.bind(id);
        }

        let result = query
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Storage(format!("flag flip: {e}")))?;

        if result.rows_affected() != message_ids.len() as u64 {
            tx.rollback()
                .await
                .map_err(|e| StorageError::Storage(format!("rollback: {e}")))?;
            return Err(StorageError::Conflict(format!(
                "compaction batch changed under us: expected {} rows, flipped {}",
                message_ids.len(),
                result.rows_affected()
            )));
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Storage(format!("commit compaction tx: {e}")))?;

        debug!(chat_id = %chat_id, folded = message_ids.len(), "Compaction committed");
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    async fn seed_chat(store: &SqliteStore) -> ChatId {
        store.create_chat(Some("test chat")).await.unwrap().id
    }

    #[tokio::test]
    async fn create_and_get_chat() {
        let store = test_store().await;
        let chat = store.create_chat(Some("hello")).await.unwrap();

        let fetched = store.get_chat(&chat.id).await.unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("hello"));
        assert!(store
            .get_chat(&ChatId::from("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn append_assigns_monotonic_seq() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        let first = store
            .append_message(Message::user(chat.clone(), "one"))
            .await
            .unwrap();
        let second = store
            .append_message(Message::assistant(chat.clone(), "two"))
            .await
            .unwrap();

        assert!(second.seq > first.seq);

        let all = store.unsummarized_messages(&chat).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "one");
        assert_eq!(all[1].content, "two");
    }

    #[tokio::test]
    async fn turn_count_excludes_tool_and_system() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        store
            .append_message(Message::user(chat.clone(), "q"))
            .await
            .unwrap();
        store
            .append_message(Message::assistant(chat.clone(), "a"))
            .await
            .unwrap();
        store
            .append_message(Message::tool_result(chat.clone(), "call_1", "result"))
            .await
            .unwrap();
        store
            .append_message(Message::system(chat.clone(), "note"))
            .await
            .unwrap();

        assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 2);
        assert_eq!(store.unsummarized_messages(&chat).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn oldest_batch_is_oldest_first() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        for i in 0..6 {
            store
                .append_message(Message::user(chat.clone(), format!("msg {i}")))
                .await
                .unwrap();
        }

        let batch = store.oldest_unsummarized_turns(&chat, 3).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].content, "msg 0");
        assert_eq!(batch[2].content, "msg 2");
    }

    #[tokio::test]
    async fn compaction_commits_summary_and_flags_together() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        let mut ids = Vec::new();
        for i in 0..4 {
            let msg = store
                .append_message(Message::user(chat.clone(), format!("msg {i}")))
                .await
                .unwrap();
            ids.push(msg.id);
        }

        store
            .apply_compaction(&chat, "they talked about four things", &ids[..2])
            .await
            .unwrap();

        let summary = store.summary(&chat).await.unwrap().unwrap();
        assert_eq!(summary.content, "they talked about four things");

        let remaining = store.unsummarized_messages(&chat).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].content, "msg 2");
    }

    #[tokio::test]
    async fn compaction_conflict_rolls_back_everything() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        let mut ids = Vec::new();
        for i in 0..3 {
            let msg = store
                .append_message(Message::user(chat.clone(), format!("msg {i}")))
                .await
                .unwrap();
            ids.push(msg.id);
        }

        store.apply_compaction(&chat, "v1", &ids[..1]).await.unwrap();

        // Re-using an already-consumed id must conflict and leave the
        // summary untouched.
        let err = store
            .apply_compaction(&chat, "v2", &ids[..2])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let summary = store.summary(&chat).await.unwrap().unwrap();
        assert_eq!(summary.content, "v1");
        assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn compaction_conflict_on_deleted_message() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        let kept = store
            .append_message(Message::user(chat.clone(), "kept"))
            .await
            .unwrap();
        let doomed = store
            .append_message(Message::user(chat.clone(), "doomed"))
            .await
            .unwrap();

        assert!(store.delete_message(&doomed.id).await.unwrap());

        let err = store
            .apply_compaction(&chat, "summary", &[kept.id.clone(), doomed.id])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // The surviving message is still raw.
        assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 1);
        assert!(store.summary(&chat).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        store.apply_compaction(&chat, "nothing", &[]).await.unwrap();
        assert!(store.summary(&chat).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tool_calls_round_trip() {
        let store = test_store().await;
        let chat = seed_chat(&store).await;

        let mut msg = Message::assistant(chat.clone(), "");
        msg.tool_calls.push(MessageToolCall {
            id: "call_1".into(),
            name: "files_search".into(),
            arguments: r#"{"query":"report"}"#.into(),
        });
        store.append_message(msg).await.unwrap();

        let all = store.unsummarized_messages(&chat).await.unwrap();
        assert_eq!(all[0].tool_calls.len(), 1);
        assert_eq!(all[0].tool_calls[0].name, "files_search");
    }
}
