//! The agentic loop — the bounded generate → tool-call → tool-result
//! cycle that lets the model use external capabilities before answering.
//!
//! State machine per turn:
//!
//! ```text
//! AwaitingModel → FinalAnswer            (zero tool calls)
//! AwaitingModel → AwaitingToolResults → AwaitingModel   (≤ 5 times)
//!              └→ forced final call with an empty tool list
//! ```
//!
//! Tool calls execute sequentially in the order the model returned them —
//! calls may have ordering dependencies and the backing servers are not
//! assumed safe under concurrent access. A generation failure is fatal
//! to the turn; a tool failure is fed back to the model as an
//! error-content result and the loop continues.

use spindle_core::error::Error;
use spindle_core::event::{DomainEvent, EventBus, ToolStatus};
use spindle_core::message::{ChatId, Message};
use spindle_core::provider::{Provider, ProviderRequest, ToolDefinition};
use spindle_core::tool::{ToolCall, ToolDescriptor};
use spindle_registry::ToolRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum tool-call iterations per turn. After this many, one last
/// generation runs with no tools, so a turn makes at most
/// `MAX_TOOL_ITERATIONS + 1` model calls.
pub const MAX_TOOL_ITERATIONS: u32 = 5;

/// Everything a completed turn produced.
#[derive(Debug)]
pub struct TurnOutput {
    /// The final answer text.
    pub answer: String,

    /// Messages appended during the loop (assistant turns and tool
    /// results, final answer included), in creation order. The caller
    /// persists these after the turn completes.
    pub new_messages: Vec<Message>,

    /// How many model invocations the turn used.
    pub model_calls: u32,

    /// Total tokens reported by the provider across all calls.
    pub tokens_used: u32,
}

/// The orchestrator for one turn's generate/tool cycle.
pub struct AgenticLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    registry: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
    max_iterations: u32,
}

impl AgenticLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        registry: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            registry,
            event_bus,
            max_iterations: MAX_TOOL_ITERATIONS,
        }
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Override the iteration cap (tests mostly).
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    fn request(&self, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
            stream: false,
        }
    }

    fn publish_status(&self, chat_id: &ChatId, call: &ToolCall, status: ToolStatus) {
        self.event_bus.publish(DomainEvent::ToolStatus {
            chat_id: chat_id.to_string(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Run one turn: `history` ends with the new user message, `tools`
    /// is the catalog assembled for this turn.
    pub async fn run(
        &self,
        chat_id: &ChatId,
        history: Vec<Message>,
        tools: Vec<ToolDescriptor>,
    ) -> Result<TurnOutput, Error> {
        let tool_definitions: Vec<ToolDefinition> =
            tools.iter().map(ToolDescriptor::to_definition).collect();

        let mut messages = history;
        let mut new_messages: Vec<Message> = Vec::new();
        let mut model_calls = 0u32;
        let mut tokens_used = 0u32;

        // No tools at all: a single plain generation, no loop.
        if tools.is_empty() {
            debug!(chat_id = %chat_id, "No tools available, single generation");
            let response = self
                .provider
                .complete(self.request(messages, Vec::new()))
                .await?;
            model_calls += 1;
            tokens_used += response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);

            let answer = response.message.content.clone();
            new_messages.push(self.stamp(chat_id, response.message));
            self.publish_turn_completed(chat_id, tokens_used);
            return Ok(TurnOutput {
                answer,
                new_messages,
                model_calls,
                tokens_used,
            });
        }

        for iteration in 1..=self.max_iterations {
            debug!(chat_id = %chat_id, iteration, "Agentic loop iteration");

            let response = self
                .provider
                .complete(self.request(messages.clone(), tool_definitions.clone()))
                .await?;
            model_calls += 1;
            tokens_used += response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);

            if response.message.tool_calls.is_empty() {
                // Zero tool calls — this is the final answer.
                let answer = response.message.content.clone();
                let message = self.stamp(chat_id, response.message);
                new_messages.push(message);
                info!(chat_id = %chat_id, iterations = iteration, "Turn completed");
                self.publish_turn_completed(chat_id, tokens_used);
                return Ok(TurnOutput {
                    answer,
                    new_messages,
                    model_calls,
                    tokens_used,
                });
            }

            // The model wants tools. Append its (possibly empty) text as
            // an assistant turn, then execute each call in order.
            let tool_calls = response.message.tool_calls.clone();
            let assistant = self.stamp(chat_id, response.message);
            messages.push(assistant.clone());
            new_messages.push(assistant);

            for tc in &tool_calls {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: serde_json::from_str(&tc.arguments).unwrap_or_default(),
                };

                self.publish_status(chat_id, &call, ToolStatus::Calling);

                let (content, status) = match self.registry.execute(&call, &tools).await {
                    Ok(result) if !result.is_error => (result.content, ToolStatus::Completed),
                    Ok(result) => (result.content, ToolStatus::Error),
                    Err(e) => {
                        warn!(chat_id = %chat_id, tool = %call.name, error = %e, "Tool execution failed");
                        (format!("Error: {e}"), ToolStatus::Error)
                    }
                };

                self.publish_status(chat_id, &call, status);

                let tool_message = Message::tool_result(chat_id.clone(), &tc.id, content);
                messages.push(tool_message.clone());
                new_messages.push(tool_message);
            }
        }

        // Iteration cap exhausted: one last generation with no tools, so
        // the model answers from what has been gathered instead of
        // looping forever.
        warn!(
            chat_id = %chat_id,
            iterations = self.max_iterations,
            "Tool iteration cap reached, forcing final answer"
        );
        let response = self
            .provider
            .complete(self.request(messages, Vec::new()))
            .await?;
        model_calls += 1;
        tokens_used += response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);

        let answer = response.message.content.clone();
        new_messages.push(self.stamp(chat_id, response.message));
        self.publish_turn_completed(chat_id, tokens_used);
        Ok(TurnOutput {
            answer,
            new_messages,
            model_calls,
            tokens_used,
        })
    }

    /// Providers build assistant messages without knowing the chat; pin
    /// the id before the message joins the history.
    fn stamp(&self, chat_id: &ChatId, mut message: Message) -> Message {
        message.chat_id = chat_id.clone();
        message
    }

    fn publish_turn_completed(&self, chat_id: &ChatId, tokens_used: u32) {
        self.event_bus.publish(DomainEvent::TurnCompleted {
            chat_id: chat_id.to_string(),
            model: self.model.clone(),
            tokens_used,
            timestamp: chrono::Utc::now(),
        });
    }
}
