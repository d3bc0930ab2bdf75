//! Background compaction — folding old turns into the rolling summary.
//!
//! Summarization is fire-and-forget: a completed turn notifies the
//! worker, which runs on an independent background task so it never
//! delays the response to the user. Runs are deduplicated by chat id,
//! and the compaction commit itself re-validates its batch, so a
//! re-trigger that finds nothing pending is a safe no-op.
//!
//! Failures are logged and left for the next natural trigger — there is
//! no dedicated retry timer.

use spindle_core::error::{CompactionError, StorageError};
use spindle_core::event::{DomainEvent, EventBus};
use spindle_core::message::{ChatId, Message};
use spindle_core::provider::{Provider, ProviderRequest};
use spindle_storage::ChatStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Unsummarized user/assistant messages before compaction triggers.
pub const SUMMARY_THRESHOLD: usize = 10;

/// Oldest messages folded per compaction run.
pub const SUMMARY_BATCH_SIZE: usize = 10;

/// Upper bound on one background run, decoupled from any request.
const COMPACTION_TIMEOUT: Duration = Duration::from_secs(300);

/// The background compaction worker.
pub struct Summarizer {
    store: Arc<dyn ChatStore>,
    provider: Arc<dyn Provider>,
    model: String,
    event_bus: Arc<EventBus>,
    threshold: usize,
    batch_size: usize,
    inflight: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Summarizer {
    pub fn new(
        store: Arc<dyn ChatStore>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            event_bus,
            threshold: SUMMARY_THRESHOLD,
            batch_size: SUMMARY_BATCH_SIZE,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Override the trigger threshold and batch size.
    pub fn with_limits(mut self, threshold: usize, batch_size: usize) -> Self {
        self.threshold = threshold;
        self.batch_size = batch_size;
        self
    }

    /// Fire-and-forget trigger, called after a turn is persisted.
    ///
    /// Spawns at most one run per chat at a time; a chat with a run
    /// already in flight is skipped (the run re-checks the threshold
    /// itself, so nothing is lost).
    pub async fn notify(self: Arc<Self>, chat_id: ChatId) {
        let mut inflight = self.inflight.lock().await;
        inflight.retain(|_, handle| !handle.is_finished());
        if inflight.contains_key(&chat_id.0) {
            debug!(chat_id = %chat_id, "Compaction already in flight, skipping trigger");
            return;
        }

        let worker = Arc::clone(&self);
        let id = chat_id.clone();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(COMPACTION_TIMEOUT, worker.run_if_due(&id)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(folded)) => {
                    info!(chat_id = %id, folded, "Compaction run complete");
                }
                Ok(Err(e)) => {
                    warn!(chat_id = %id, "Compaction failed, leaving for next trigger: {e}");
                }
                Err(_) => {
                    warn!(chat_id = %id, "Compaction timed out, leaving for next trigger");
                }
            }
        });
        inflight.insert(chat_id.0, handle);
    }

    /// Await every in-flight run. Lets tests (and shutdown) observe
    /// background completion deterministically.
    pub async fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inflight = self.inflight.lock().await;
            inflight.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Run a compaction if the chat has crossed the threshold.
    async fn run_if_due(&self, chat_id: &ChatId) -> Result<usize, CompactionError> {
        let count = self
            .store
            .count_unsummarized_turns(chat_id)
            .await
            .map_err(|e| CompactionError::Storage(e.to_string()))?;
        if count < self.threshold {
            debug!(chat_id = %chat_id, count, threshold = self.threshold, "Below compaction threshold");
            return Ok(0);
        }
        self.run_once(chat_id).await
    }

    /// One compaction run: fetch the oldest batch, merge it into the
    /// summary via the model, commit atomically.
    ///
    /// Compacts whatever is available when fewer than a full batch
    /// remains; zero available messages is a no-op.
    pub async fn run_once(&self, chat_id: &ChatId) -> Result<usize, CompactionError> {
        let batch = self
            .store
            .oldest_unsummarized_turns(chat_id, self.batch_size)
            .await
            .map_err(|e| CompactionError::Storage(e.to_string()))?;
        if batch.is_empty() {
            return Ok(0);
        }

        let current = self
            .store
            .summary(chat_id)
            .await
            .map_err(|e| CompactionError::Storage(e.to_string()))?;

        let prompt = Self::merge_prompt(current.as_ref().map(|s| s.content.as_str()), &batch);
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![Message::user(chat_id.clone(), prompt)],
            temperature: 0.3,
            max_tokens: None,
            tools: Vec::new(),
            stream: false,
        };

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| CompactionError::Merge(e.to_string()))?;

        let new_summary = response.message.content.trim().to_string();
        if new_summary.is_empty() {
            return Err(CompactionError::Merge("model returned an empty summary".into()));
        }

        let ids: Vec<String> = batch.iter().map(|m| m.id.clone()).collect();
        self.store
            .apply_compaction(chat_id, &new_summary, &ids)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => CompactionError::Conflict(chat_id.to_string()),
                other => CompactionError::Storage(other.to_string()),
            })?;

        self.event_bus.publish(DomainEvent::ChatCompacted {
            chat_id: chat_id.to_string(),
            messages_folded: ids.len(),
            timestamp: chrono::Utc::now(),
        });

        Ok(ids.len())
    }

    /// The merge prompt: current summary (if any) plus the new batch's
    /// transcript, asking for one updated narrative.
    fn merge_prompt(current: Option<&str>, batch: &[Message]) -> String {
        let mut prompt = String::from(
            "You maintain a running summary of a conversation. \
             Produce an updated summary that folds the new messages into \
             the existing one. Keep it a concise narrative; preserve \
             names, decisions, and open questions. Reply with the \
             summary text only.\n\n",
        );

        match current {
            Some(summary) if !summary.is_empty() => {
                prompt.push_str("Current summary:\n");
                prompt.push_str(summary);
                prompt.push_str("\n\n");
            }
            _ => prompt.push_str("There is no summary yet.\n\n"),
        }

        prompt.push_str("New messages:\n");
        for message in batch {
            prompt.push_str(message.role.as_str());
            prompt.push_str(": ");
            prompt.push_str(&message.content);
            prompt.push('\n');
        }
        prompt
    }
}
