//! Test doubles shared by the engine's unit and integration tests.
//!
//! Kept in the library (not `#[cfg(test)]`) so the `tests/` directory
//! can use the same scripted provider and fake tool server.

use async_trait::async_trait;
use serde_json::Value;
use spindle_core::error::{ProviderError, RegistryError};
use spindle_core::message::{ChatId, Message, MessageToolCall};
use spindle_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use spindle_registry::{NoSkillSource, ToolRegistry, ToolServerConnection};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A provider that replays a fixed script of responses, recording how
/// many tool definitions each request carried.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    tools_seen: Mutex<Vec<usize>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            tools_seen: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every call fails.
    pub fn failing() -> Self {
        Self::new(vec![Err(ProviderError::ApiError {
            status_code: 500,
            message: "scripted failure".into(),
        })])
    }

    /// Tool-definition counts per request, in call order.
    pub fn tools_per_call(&self) -> Vec<usize> {
        self.tools_seen.lock().unwrap().clone()
    }

    /// Number of completed calls so far.
    pub fn calls(&self) -> usize {
        self.tools_seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        self.tools_seen.lock().unwrap().push(request.tools.len());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::NotConfigured("script exhausted".into()))
            })
    }
}

/// A plain-text scripted response.
pub fn text_response(text: &str) -> Result<ProviderResponse, ProviderError> {
    Ok(ProviderResponse {
        message: Message::assistant(ChatId::from("unstamped"), text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    })
}

/// A scripted response requesting exactly one tool call.
pub fn tool_call_response(
    id: &str,
    name: &str,
    arguments: &str,
) -> Result<ProviderResponse, ProviderError> {
    let mut message = Message::assistant(ChatId::from("unstamped"), "");
    message.tool_calls.push(MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    });
    Ok(ProviderResponse {
        message,
        usage: None,
        model: "mock-model".into(),
    })
}

/// A fake tool server: `echo` succeeds with its arguments, `fail`
/// always errors.
pub struct EchoConnection;

#[async_trait]
impl ToolServerConnection for EchoConnection {
    async fn list_tools(&self) -> Result<Vec<Value>, RegistryError> {
        Ok(vec![
            serde_json::json!({
                "name": "echo",
                "description": "Echoes the input",
                "inputSchema": { "type": "object" }
            }),
            serde_json::json!({
                "name": "fail",
                "description": "Always fails",
                "inputSchema": { "type": "object" }
            }),
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, RegistryError> {
        if name == "fail" {
            return Err(RegistryError::ListToolsFailed {
                server: "srv".into(),
                reason: "scripted tool failure".into(),
            });
        }
        Ok(format!("echo: {arguments}"))
    }

    async fn shutdown(&self) {}
}

/// A registry wired with [`EchoConnection`] under server id `srv` and
/// an empty skill catalog.
pub async fn scripted_registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new(
        Arc::new(NoSkillSource),
        Duration::from_secs(3600),
    ));
    registry.with_session("srv", Arc::new(EchoConnection)).await;
    registry
}
