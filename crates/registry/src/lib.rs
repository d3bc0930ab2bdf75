//! Tool aggregation for Spindle.
//!
//! The `ToolRegistry` presents every currently-available capability as
//! one flat list of descriptors per turn, drawn from two sources:
//!
//! - **Remote tool servers** — live JSON-RPC endpoints (HTTP or child
//!   process). Sessions are established lazily, cached per server id,
//!   and torn down explicitly.
//! - **The skills catalog** — cached documents exposed as
//!   `skill_{name}` pseudo-tools whose "execution" returns their own
//!   documentation plus the caller's query.
//!
//! A server or skill source that is down costs the turn its tools, not
//! the turn itself: failures here are logged and skipped.

use serde_json::Value;
use spindle_core::error::RegistryError;
use spindle_core::server::ToolServer;
use spindle_core::tool::{ToolDescriptor, ToolSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

mod executor;
pub mod session;
pub mod skills;

pub use session::{ServerSession, ToolServerConnection};
pub use skills::{HttpSkillSource, NoSkillSource, SkillCache, SkillEntry, SkillSource};

/// Reserved namespace prefix for skill-backed tools. Server prefixes
/// that would land inside it are rewritten, so the two namespaces are
/// disjoint by construction.
pub const SKILL_PREFIX: &str = "skill_";

/// Maximum length of a sanitized server-name prefix.
const SERVER_PREFIX_MAX: usize = 20;

/// Maximum length of a sanitized skill name.
const SKILL_NAME_MAX: usize = 30;

/// Aggregates server- and skill-backed tools behind one interface.
///
/// Shared mutable state (the session map and the skill cache) is read
/// by many concurrent turns; session creation/teardown and cache
/// refresh take the write side.
pub struct ToolRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn ToolServerConnection>>>,
    skill_cache: SkillCache,
}

impl ToolRegistry {
    /// Create a registry over the given skill source and cache TTL.
    pub fn new(skill_source: Arc<dyn SkillSource>, skill_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            skill_cache: SkillCache::new(skill_source, skill_ttl),
        }
    }

    /// Lowercase, spaces to underscores, strip anything outside
    /// `[a-z0-9_]`, truncate. Keeps generated tool names within typical
    /// model-API identifier limits.
    pub fn sanitize_name(name: &str, max_len: usize) -> String {
        let mut out: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' { '_' } else { c })
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
            .collect();
        out.truncate(max_len);
        out
    }

    /// The namespace prefix for a server's tools. `skill_` is reserved
    /// for the skills catalog: a server whose sanitized name would put
    /// its tools into that namespace gets an `srv_` marker, so executor
    /// routing stays unambiguous.
    fn server_prefix(server: &ToolServer) -> String {
        let mut prefix = Self::sanitize_name(&server.name, SERVER_PREFIX_MAX);
        if prefix == "skill" || prefix.starts_with("skill_") {
            prefix.insert_str(0, "srv_");
            prefix.truncate(SERVER_PREFIX_MAX);
        }
        prefix
    }

    /// Get or lazily establish the session for a server. Idempotent —
    /// an existing session is reused.
    async fn session(
        &self,
        server: &ToolServer,
    ) -> Result<Arc<dyn ToolServerConnection>, RegistryError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&server.id) {
                return Ok(session.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        // Double-check: another turn may have connected while we waited.
        if let Some(session) = sessions.get(&server.id) {
            return Ok(session.clone());
        }

        let session: Arc<dyn ToolServerConnection> =
            Arc::new(ServerSession::connect(server).await?);
        sessions.insert(server.id.clone(), session.clone());
        info!(server = %server.id, "Established tool server session");
        Ok(session)
    }

    /// Inject a pre-built session for a server id. Used by tests and by
    /// embedders with custom transports.
    pub async fn with_session(&self, server_id: &str, session: Arc<dyn ToolServerConnection>) {
        self.sessions
            .write()
            .await
            .insert(server_id.to_string(), session);
    }

    /// Tear down one server's session (on disable/removal).
    pub async fn disconnect(&self, server_id: &str) {
        if let Some(session) = self.sessions.write().await.remove(server_id) {
            session.shutdown().await;
            info!(server = %server_id, "Tore down tool server session");
        }
    }

    /// Tear down every session.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        for (id, session) in sessions.drain() {
            debug!(server = %id, "Shutting down tool server session");
            session.shutdown().await;
        }
    }

    /// List tools from every enabled server.
    ///
    /// Failure to connect to, or list tools from, one server is
    /// non-fatal: that server is skipped with a warning and assembly
    /// continues — a turn must not fail because one integration is down.
    pub async fn list_enabled_tools(&self, servers: &[ToolServer]) -> Vec<ToolDescriptor> {
        let mut tools = Vec::new();

        for server in servers.iter().filter(|s| s.enabled) {
            let session = match self.session(server).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(server = %server.id, "Skipping tool server (connect failed): {e}");
                    continue;
                }
            };

            let raw_tools = match session.list_tools().await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(server = %server.id, "Skipping tool server (list failed): {e}");
                    continue;
                }
            };

            let prefix = Self::server_prefix(server);
            for raw in &raw_tools {
                let Some(remote_name) = raw.get("name").and_then(Value::as_str) else {
                    warn!(server = %server.id, "Ignoring tool with missing name");
                    continue;
                };
                let description = raw
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut input_schema = raw
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" }));
                // Some model APIs reject "$schema" in function parameters.
                if let Some(obj) = input_schema.as_object_mut() {
                    obj.remove("$schema");
                }

                tools.push(ToolDescriptor {
                    name: format!("{prefix}_{remote_name}"),
                    description,
                    input_schema,
                    source: ToolSource::Server {
                        server_id: server.id.clone(),
                        remote_name: remote_name.to_string(),
                    },
                });
            }
        }

        tools
    }

    /// List the skills catalog as `skill_{name}` pseudo-tools.
    ///
    /// Reads through the TTL'd cache; an unreachable skill source means
    /// no skill tools this turn, never an error.
    pub async fn list_skill_tools(&self) -> Vec<ToolDescriptor> {
        self.skill_cache
            .entries_or_empty()
            .await
            .iter()
            .map(|skill| ToolDescriptor {
                name: format!(
                    "{SKILL_PREFIX}{}",
                    Self::sanitize_name(&skill.name, SKILL_NAME_MAX)
                ),
                description: skill.description.clone(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What you want to do with this skill"
                        }
                    },
                    "required": ["query"]
                }),
                source: ToolSource::Skill,
            })
            .collect()
    }

    /// The full tool list for one turn: servers ∪ skills, one flat list.
    pub async fn all_tools(&self, servers: &[ToolServer]) -> Vec<ToolDescriptor> {
        let mut tools = self.list_enabled_tools(servers).await;
        tools.extend(self.list_skill_tools().await);
        tools
    }
}
