//! Tool domain types — the uniform view over callable capabilities.
//!
//! Tools come from two sources: remote tool servers (live dispatch over
//! JSON-RPC) and the cached skills catalog (documentation-backed
//! pseudo-tools). Both are presented to the model as one flat list of
//! descriptors, recomputed per turn from current registry state and
//! never persisted.

use serde::{Deserialize, Serialize};

use crate::provider::ToolDefinition;

/// Where a tool's execution is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSource {
    /// Backed by a remote tool server. `remote_name` is the server-side
    /// name before namespacing — dispatch must use it, not the prefixed
    /// name offered to the model.
    Server {
        server_id: String,
        remote_name: String,
    },

    /// Backed by the skills catalog — "execution" resolves to the
    /// skill's own documentation plus the caller's query.
    Skill,
}

/// A capability descriptor offered to the model for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Globally unique name within a turn (namespaced by source)
    pub name: String,

    /// Description of what the tool does (sent to the LLM)
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub input_schema: serde_json::Value,

    /// Which source executes this tool
    pub source: ToolSource,
}

impl ToolDescriptor {
    /// Convert this descriptor into a ToolDefinition for the provider.
    /// The source ref is an engine-internal routing detail — the model
    /// only sees name, description, and schema.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// A request to execute a tool, produced by the model.
/// Consumed by the executor exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution, fed back into the conversation as a
/// tool-role message. Content is always a string — structured results
/// are serialized to text before re-injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Name of the tool that produced this result
    pub name: String,

    /// The output content
    pub content: String,

    /// Whether the execution failed
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: true,
        }
    }
}
