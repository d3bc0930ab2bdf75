//! The engine facade — the single entry point every frontend uses.
//!
//! `run_turn` wires the pipeline together: assemble history → collect
//! tools → run the agentic loop → persist the turn → nudge the
//! background summarizer. The registry, store, provider, and event bus
//! are explicitly constructed, injectable components owned for the
//! process lifetime.

use spindle_core::error::{Error, StorageError};
use spindle_core::event::EventBus;
use spindle_core::message::{Chat, ChatId, Message};
use spindle_core::provider::Provider;
use spindle_core::server::ToolServer;
use spindle_registry::ToolRegistry;
use spindle_storage::ChatStore;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::ContextAssembler;
use crate::loop_runner::AgenticLoop;
use crate::summarizer::Summarizer;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub summary_threshold: usize,
    pub summary_batch_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".into(),
            temperature: 0.7,
            max_tokens: None,
            summary_threshold: crate::summarizer::SUMMARY_THRESHOLD,
            summary_batch_size: crate::summarizer::SUMMARY_BATCH_SIZE,
        }
    }
}

/// The conversation engine.
pub struct Engine {
    store: Arc<dyn ChatStore>,
    registry: Arc<ToolRegistry>,
    servers: Vec<ToolServer>,
    assembler: ContextAssembler,
    agentic: AgenticLoop,
    summarizer: Arc<Summarizer>,
    event_bus: Arc<EventBus>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ChatStore>,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        servers: Vec<ToolServer>,
        event_bus: Arc<EventBus>,
        options: EngineOptions,
    ) -> Self {
        let assembler = ContextAssembler::new(store.clone());

        let mut agentic = AgenticLoop::new(
            provider.clone(),
            options.model.clone(),
            options.temperature,
            registry.clone(),
            event_bus.clone(),
        );
        if let Some(max) = options.max_tokens {
            agentic = agentic.with_max_tokens(max);
        }

        let summarizer = Arc::new(
            Summarizer::new(
                store.clone(),
                provider,
                options.model.clone(),
                event_bus.clone(),
            )
            .with_limits(options.summary_threshold, options.summary_batch_size),
        );

        Self {
            store,
            registry,
            servers,
            assembler,
            agentic,
            summarizer,
            event_bus,
        }
    }

    /// Create a new chat thread.
    pub async fn create_chat(&self, title: Option<&str>) -> Result<Chat, Error> {
        Ok(self.store.create_chat(title).await?)
    }

    /// The event bus carrying tool-status and turn/compaction events.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// The background summarizer (exposed so callers can await idleness
    /// on shutdown and in tests).
    pub fn summarizer(&self) -> &Arc<Summarizer> {
        &self.summarizer
    }

    /// Run one turn: returns the final answer after persisting the
    /// user's message and everything the loop produced, then triggers a
    /// background compaction check.
    pub async fn run_turn(
        &self,
        chat_id: &ChatId,
        user_input: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, Error> {
        if self.store.get_chat(chat_id).await?.is_none() {
            return Err(StorageError::ChatNotFound(chat_id.to_string()).into());
        }

        info!(chat_id = %chat_id, "Running turn");

        let history = self
            .assembler
            .build_history(chat_id, user_input, system_prompt)
            .await?;

        let tools = self.registry.all_tools(&self.servers).await;
        debug!(chat_id = %chat_id, tools = tools.len(), "Assembled tool catalog");

        let output = self.agentic.run(chat_id, history, tools).await?;

        // Persistence happens only after the loop completed, so a
        // cancelled or failed turn writes nothing.
        self.store
            .append_message(Message::user(chat_id.clone(), user_input))
            .await?;
        for message in output.new_messages {
            self.store.append_message(message).await?;
        }

        Arc::clone(&self.summarizer).notify(chat_id.clone()).await;

        Ok(output.answer)
    }
}
