//! Tool execution — routing a model-issued call to its source.
//!
//! Skill-prefixed calls resolve against the cached catalog and return
//! the skill's documentation packaged with the caller's query; the
//! model, not the executor, acts on that content in the next loop
//! iteration. Everything else dispatches to the owning server's
//! session, matched by exact name in the tool list computed for this
//! turn. Server identity stays out of outward-visible error text —
//! it lives in the logs.

use serde_json::Value;
use spindle_core::error::ToolError;
use spindle_core::tool::{ToolCall, ToolDescriptor, ToolResult, ToolSource};
use tracing::{debug, warn};

use crate::{SKILL_PREFIX, SKILL_NAME_MAX, ToolRegistry};

impl ToolRegistry {
    /// Execute one tool call against this turn's tool list.
    ///
    /// Errors returned here are absorbed by the agentic loop into
    /// error-content tool results — they never abort the turn.
    pub async fn execute(
        &self,
        call: &ToolCall,
        turn_tools: &[ToolDescriptor],
    ) -> Result<ToolResult, ToolError> {
        if let Some(skill_name) = call.name.strip_prefix(SKILL_PREFIX) {
            return self.execute_skill(call, skill_name).await;
        }

        let descriptor = turn_tools
            .iter()
            .find(|t| t.name == call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let ToolSource::Server {
            server_id,
            remote_name,
        } = &descriptor.source
        else {
            // Unreachable by construction: only server tools lack the
            // skill prefix.
            return Err(ToolError::NotFound(call.name.clone()));
        };

        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(server_id).cloned()
        };
        let Some(session) = session else {
            warn!(server = %server_id, tool = %call.name, "No active session for tool dispatch");
            return Err(ToolError::DispatchFailed {
                tool_name: call.name.clone(),
                reason: "tool server session is not available".into(),
            });
        };

        debug!(tool = %call.name, remote = %remote_name, "Dispatching tool call");
        match session.call_tool(remote_name, call.arguments.clone()).await {
            Ok(content) => Ok(ToolResult::ok(&call.id, &call.name, content)),
            Err(e) => {
                warn!(server = %server_id, tool = %call.name, error = %e, "Tool dispatch failed");
                Err(ToolError::DispatchFailed {
                    tool_name: call.name.clone(),
                    reason: "tool server request failed".into(),
                })
            }
        }
    }

    /// Resolve a skill call: package the skill's full documentation with
    /// the sub-query for the model to act on.
    async fn execute_skill(
        &self,
        call: &ToolCall,
        skill_name: &str,
    ) -> Result<ToolResult, ToolError> {
        let query = call
            .arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let entries = self.skill_cache.entries_or_empty().await;
        let skill = entries
            .iter()
            .find(|s| {
                Self::sanitize_name(&s.name, SKILL_NAME_MAX) == skill_name || s.name == skill_name
            })
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let content = format!(
            "# Skill: {}\n\n{}\n\n{}\n\n---\nQuery: {}\n\nApply the skill documentation above to the query.",
            skill.name, skill.description, skill.content, query
        );
        Ok(ToolResult::ok(&call.id, &call.name, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::tests::CountingSource;
    use crate::tests::FakeConnection;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn registry_with_skill() -> ToolRegistry {
        ToolRegistry::new(
            Arc::new(CountingSource::with_skills(vec![(
                "Weather Report",
                "Weather lookups",
                "Check the barometer first.",
            )])),
            Duration::from_secs(3600),
        )
    }

    fn server_tool(name: &str, server_id: &str, remote_name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({ "type": "object" }),
            source: ToolSource::Server {
                server_id: server_id.into(),
                remote_name: remote_name.into(),
            },
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn dispatches_to_owning_server_by_remote_name() {
        let registry = registry_with_skill();
        registry
            .with_session(
                "srv_files",
                Arc::new(FakeConnection {
                    tools: vec![],
                    fail_list: false,
                }),
            )
            .await;

        let tools = vec![server_tool("files_search", "srv_files", "search")];
        let result = registry
            .execute(&call("files_search", serde_json::json!({"q": "x"})), &tools)
            .await
            .unwrap();

        assert!(!result.is_error);
        // FakeConnection echoes the *remote* name — proof the prefix was
        // stripped before dispatch.
        assert_eq!(result.content, "called search");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = registry_with_skill();
        let err = registry
            .execute(&call("no_such_tool", serde_json::json!({})), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_session_is_a_dispatch_failure_without_server_id() {
        let registry = registry_with_skill();
        let tools = vec![server_tool("files_search", "srv_secret", "search")];
        let err = registry
            .execute(&call("files_search", serde_json::json!({})), &tools)
            .await
            .unwrap_err();

        match err {
            ToolError::DispatchFailed { reason, .. } => {
                assert!(!reason.contains("srv_secret"), "server id leaked: {reason}");
            }
            other => panic!("expected DispatchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skill_call_packages_documentation_and_query() {
        let registry = registry_with_skill();
        let result = registry
            .execute(
                &call(
                    "skill_weather_report",
                    serde_json::json!({"query": "rain tomorrow?"}),
                ),
                &[],
            )
            .await
            .unwrap();

        assert!(!result.is_error);
        assert!(result.content.contains("Check the barometer first."));
        assert!(result.content.contains("rain tomorrow?"));
    }

    #[tokio::test]
    async fn skill_resolves_by_exact_name_too() {
        let registry = ToolRegistry::new(
            Arc::new(CountingSource::with_skills(vec![(
                "tides",
                "Tide tables",
                "Tide documentation",
            )])),
            Duration::from_secs(3600),
        );

        let result = registry
            .execute(&call("skill_tides", serde_json::json!({"query": "now"})), &[])
            .await
            .unwrap();
        assert!(result.content.contains("Tide documentation"));
    }

    #[tokio::test]
    async fn missing_skill_is_not_found() {
        let registry = registry_with_skill();
        let err = registry
            .execute(&call("skill_nonexistent", serde_json::json!({})), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_cache_refreshes_once_per_window() {
        let source = Arc::new(CountingSource::with_skills(vec![(
            "weather",
            "",
            "doc",
        )]));
        let registry = ToolRegistry::new(source.clone(), Duration::from_secs(3600));

        // Cache starts empty (treated as expired): first execution
        // triggers exactly one full refresh.
        let _ = registry
            .execute(
                &call("skill_weather", serde_json::json!({"query": "today?"})),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        // A second call within the TTL window triggers zero refreshes.
        let _ = registry
            .execute(
                &call("skill_weather", serde_json::json!({"query": "tomorrow?"})),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }
}
