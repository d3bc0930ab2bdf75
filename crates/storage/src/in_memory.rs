//! In-memory store — useful for testing and ephemeral sessions.
//!
//! Semantics match the SQLite backend, including the all-or-nothing
//! compaction commit. A test-only failure knob lets tests observe that
//! an interrupted compaction leaves no partial effect.

use async_trait::async_trait;
use chrono::Utc;
use spindle_core::error::StorageError;
use spindle_core::message::{Chat, ChatId, ChatSummary, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ChatStore;

#[derive(Default)]
struct Inner {
    chats: HashMap<String, Chat>,
    messages: Vec<Message>,
    summaries: HashMap<String, ChatSummary>,
    next_seq: i64,
}

/// An in-memory chat store backed by a Vec of messages.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    /// When set, `apply_compaction` fails before writing anything —
    /// simulates a transaction interrupted before commit.
    fail_compactions: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            fail_compactions: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `apply_compaction` fail without effect.
    pub fn fail_compactions(&self, fail: bool) {
        self.fail_compactions.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_chat(&self, title: Option<&str>) -> Result<Chat, StorageError> {
        let chat = Chat::new(title.map(String::from));
        self.inner
            .write()
            .await
            .chats
            .insert(chat.id.0.clone(), chat.clone());
        Ok(chat)
    }

    async fn get_chat(&self, id: &ChatId) -> Result<Option<Chat>, StorageError> {
        Ok(self.inner.read().await.chats.get(&id.0).cloned())
    }

    async fn append_message(&self, mut message: Message) -> Result<Message, StorageError> {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        message.seq = inner.next_seq;
        if let Some(chat) = inner.chats.get_mut(&message.chat_id.0) {
            chat.updated_at = Utc::now();
        }
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn unsummarized_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.read().await;
        let mut msgs: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.chat_id == *chat_id && !m.summarized)
            .cloned()
            .collect();
        msgs.sort_by_key(|m| m.seq);
        Ok(msgs)
    }

    async fn count_unsummarized_turns(&self, chat_id: &ChatId) -> Result<usize, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.chat_id == *chat_id && !m.summarized && m.role.is_conversational())
            .count())
    }

    async fn oldest_unsummarized_turns(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.read().await;
        let mut msgs: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.chat_id == *chat_id && !m.summarized && m.role.is_conversational())
            .cloned()
            .collect();
        msgs.sort_by_key(|m| m.seq);
        msgs.truncate(limit);
        Ok(msgs)
    }

    async fn summary(&self, chat_id: &ChatId) -> Result<Option<ChatSummary>, StorageError> {
        Ok(self.inner.read().await.summaries.get(&chat_id.0).cloned())
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
        if self.fail_compactions.load(Ordering::SeqCst) {
            return Err(StorageError::Storage("injected compaction failure".into()));
        }

        let mut inner = self.inner.write().await;

        // Validate the whole batch before mutating anything — the
        // in-memory equivalent of commit-time re-validation.
        for id in message_ids {
            let valid = inner
                .messages
                .iter()
                .any(|m| m.id == *id && m.chat_id == *chat_id && !m.summarized);
            if !valid {
                return Err(StorageError::Conflict(format!(
                    "compaction batch changed under us: message {id} no longer raw"
                )));
            }
        }

        for msg in inner.messages.iter_mut() {
            if message_ids.contains(&msg.id) {
                msg.summarized = true;
            }
        }
        inner.summaries.insert(
            chat_id.0.clone(),
            ChatSummary {
                chat_id: chat_id.clone(),
                content: summary.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        let before = inner.messages.len();
        inner.messages.retain(|m| m.id != message_id);
        Ok(inner.messages.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (InMemoryStore, ChatId, Vec<String>) {
        let store = InMemoryStore::new();
        let chat = store.create_chat(None).await.unwrap().id;
        let mut ids = Vec::new();
        for i in 0..5 {
            let msg = store
                .append_message(Message::user(chat.clone(), format!("msg {i}")))
                .await
                .unwrap();
            ids.push(msg.id);
        }
        (store, chat, ids)
    }

    #[tokio::test]
    async fn seq_is_monotonic() {
        let (store, chat, _) = seeded().await;
        let msgs = store.unsummarized_messages(&chat).await.unwrap();
        for pair in msgs.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
        }
    }

    #[tokio::test]
    async fn compaction_flips_flags_and_replaces_summary() {
        let (store, chat, ids) = seeded().await;

        store.apply_compaction(&chat, "v1", &ids[..2]).await.unwrap();
        assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 3);

        store.apply_compaction(&chat, "v2", &ids[2..4]).await.unwrap();
        let summary = store.summary(&chat).await.unwrap().unwrap();
        assert_eq!(summary.content, "v2", "summary is replaced, not appended");
    }

    #[tokio::test]
    async fn compaction_conflict_has_no_partial_effect() {
        let (store, chat, ids) = seeded().await;
        store.apply_compaction(&chat, "v1", &ids[..1]).await.unwrap();

        // Batch includes an already-consumed id → conflict, nothing changes.
        let err = store
            .apply_compaction(&chat, "v2", &ids[..3])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        assert_eq!(store.summary(&chat).await.unwrap().unwrap().content, "v1");
        assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn injected_failure_leaves_store_untouched() {
        let (store, chat, ids) = seeded().await;
        store.fail_compactions(true);

        let err = store
            .apply_compaction(&chat, "never", &ids[..2])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Storage(_)));
        assert!(store.summary(&chat).await.unwrap().is_none());
        assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 5);

        store.fail_compactions(false);
        store.apply_compaction(&chat, "now", &ids[..2]).await.unwrap();
        assert_eq!(store.count_unsummarized_turns(&chat).await.unwrap(), 3);
    }
}
