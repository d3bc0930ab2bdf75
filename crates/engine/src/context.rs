//! Context assembly — building the message sequence for a turn.
//!
//! The assembled history has a fixed layering:
//!
//! 1. The caller's system prompt (if any) — identity, rules
//! 2. The chat's rolling summary (if any) as a synthetic system message
//! 3. The unsummarized message tail, in creation order
//! 4. The new user input
//!
//! Context budgeting is by message count, enforced upstream by the
//! compaction worker: the tail only ever holds messages not yet folded
//! into the summary.

use spindle_core::error::StorageError;
use spindle_core::message::{ChatId, Message};
use spindle_storage::ChatStore;
use std::sync::Arc;
use tracing::debug;

/// Prefix for the synthetic system message that injects the summary.
pub(crate) const SUMMARY_PREAMBLE: &str = "Here is a summary of the earlier conversation: ";

/// Builds the message sequence sent to the model for a turn.
/// Stateless — create one and reuse it.
pub struct ContextAssembler {
    store: Arc<dyn ChatStore>,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Assemble the full history for one turn. The returned list ends
    /// with the new user message; the caller persists that message only
    /// after the turn completes.
    pub async fn build_history(
        &self,
        chat_id: &ChatId,
        user_input: &str,
        system_prompt: Option<&str>,
    ) -> Result<Vec<Message>, StorageError> {
        let mut history = Vec::new();

        if let Some(prompt) = system_prompt {
            if !prompt.is_empty() {
                history.push(Message::system(chat_id.clone(), prompt));
            }
        }

        if let Some(summary) = self.store.summary(chat_id).await? {
            if !summary.content.is_empty() {
                history.push(Message::system(
                    chat_id.clone(),
                    format!("{SUMMARY_PREAMBLE}{}", summary.content),
                ));
            }
        }

        let tail = self.store.unsummarized_messages(chat_id).await?;
        debug!(chat_id = %chat_id, tail = tail.len(), "Assembled context tail");
        history.extend(tail);

        history.push(Message::user(chat_id.clone(), user_input));
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_core::message::Role;
    use spindle_storage::InMemoryStore;

    async fn store_with_chat() -> (Arc<InMemoryStore>, ChatId) {
        let store = Arc::new(InMemoryStore::new());
        let chat = store.create_chat(None).await.unwrap().id;
        (store, chat)
    }

    #[tokio::test]
    async fn empty_chat_yields_just_the_user_message() {
        let (store, chat) = store_with_chat().await;
        let assembler = ContextAssembler::new(store);

        let history = assembler.build_history(&chat, "hi", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn system_prompt_comes_first() {
        let (store, chat) = store_with_chat().await;
        let assembler = ContextAssembler::new(store);

        let history = assembler
            .build_history(&chat, "hi", Some("You are terse."))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, "You are terse.");
    }

    #[tokio::test]
    async fn summary_is_injected_ahead_of_the_tail() {
        let (store, chat) = store_with_chat().await;

        let old = store
            .append_message(Message::user(chat.clone(), "old question"))
            .await
            .unwrap();
        store
            .append_message(Message::user(chat.clone(), "recent question"))
            .await
            .unwrap();
        store
            .apply_compaction(&chat, "they discussed an old question", &[old.id])
            .await
            .unwrap();

        let assembler = ContextAssembler::new(store);
        let history = assembler.build_history(&chat, "next", None).await.unwrap();

        // summary system message + 1 unsummarized + new user input
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert!(history[0].content.starts_with(SUMMARY_PREAMBLE));
        assert!(history[0].content.contains("old question"));
        assert_eq!(history[1].content, "recent question");
        assert_eq!(history[2].content, "next");
    }

    #[tokio::test]
    async fn summarized_messages_are_excluded_from_the_tail() {
        let (store, chat) = store_with_chat().await;

        let mut ids = Vec::new();
        for i in 0..4 {
            let msg = store
                .append_message(Message::user(chat.clone(), format!("msg {i}")))
                .await
                .unwrap();
            ids.push(msg.id);
        }
        store
            .apply_compaction(&chat, "summary", &ids[..3])
            .await
            .unwrap();

        let assembler = ContextAssembler::new(store);
        let history = assembler.build_history(&chat, "next", None).await.unwrap();

        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert!(!contents.contains(&"msg 0"));
        assert!(contents.contains(&"msg 3"));
    }

    #[tokio::test]
    async fn tool_messages_stay_in_the_tail() {
        let (store, chat) = store_with_chat().await;

        store
            .append_message(Message::user(chat.clone(), "run it"))
            .await
            .unwrap();
        store
            .append_message(Message::tool_result(chat.clone(), "call_1", "done"))
            .await
            .unwrap();

        let assembler = ContextAssembler::new(store);
        let history = assembler.build_history(&chat, "and?", None).await.unwrap();

        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::Tool);
    }
}
