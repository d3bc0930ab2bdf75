//! Chat persistence for Spindle.
//!
//! The `ChatStore` trait is the storage contract the engine runs
//! against: append-only messages with store-assigned creation order,
//! a per-chat rolling summary, and the atomic compaction commit that
//! replaces the summary and flips the `summarized` flag on a batch of
//! messages in one transaction.
//!
//! Backends:
//! - [`SqliteStore`] — production backend (sqlx, WAL journal mode)
//! - [`InMemoryStore`] — tests and ephemeral sessions

use async_trait::async_trait;
use spindle_core::error::StorageError;
use spindle_core::message::{Chat, ChatId, ChatSummary, Message};

pub mod in_memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// The storage contract for chats, messages, and summaries.
///
/// Ordering: `append_message` assigns a monotonic per-store `seq`; all
/// reads return messages in `seq` order. The `summarized` flag is only
/// ever flipped `false → true`, and only by `apply_compaction`.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// A human-readable backend name.
    fn name(&self) -> &str;

    /// Create a new chat.
    async fn create_chat(&self, title: Option<&str>) -> Result<Chat, StorageError>;

    /// Fetch a chat by id.
    async fn get_chat(&self, id: &ChatId) -> Result<Option<Chat>, StorageError>;

    /// Append a message, assigning its creation order. Returns the
    /// stored message with `seq` filled in.
    async fn append_message(&self, message: Message) -> Result<Message, StorageError>;

    /// All messages for a chat with `summarized = false`, every role,
    /// in creation order. This is the context tail sent to the model.
    async fn unsummarized_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>, StorageError>;

    /// Count of unsummarized user/assistant messages (tool and system
    /// messages are excluded from compaction accounting).
    async fn count_unsummarized_turns(&self, chat_id: &ChatId) -> Result<usize, StorageError>;

    /// The oldest `limit` unsummarized user/assistant messages, in
    /// creation order. Compaction always advances from the oldest end.
    async fn oldest_unsummarized_turns(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    /// The chat's current rolling summary, if any.
    async fn summary(&self, chat_id: &ChatId) -> Result<Option<ChatSummary>, StorageError>;

    /// Commit a compaction run: replace the chat summary and flip
    /// `summarized = true` on exactly `message_ids`, atomically.
    ///
    /// The batch is re-validated at commit time — if any id no longer
    /// exists unsummarized (a concurrent delete or compaction won the
    /// race), the whole transaction rolls back with
    /// [`StorageError::Conflict`] and no partial effect is observable.
    async fn apply_compaction(
        &self,
        chat_id: &ChatId,
        summary: &str,
        message_ids: &[String],
    ) -> Result<(), StorageError>;

    /// Delete a message by id. Returns whether a row was removed.
    async fn delete_message(&self, message_id: &str) -> Result<bool, StorageError>;
}
