//! Remote tool-server descriptors.
//!
//! A tool server speaks a JSON-RPC request/response protocol supporting
//! `tools/list` and `tools/call`, over either an HTTP endpoint or a
//! spawned child process's stdio. A server must have an established
//! session before tools can be listed or called; session state is
//! cached per server id and torn down explicitly on disable/removal.

use serde::{Deserialize, Serialize};

/// How to reach a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ServerTransport {
    /// JSON-RPC over HTTP POST to a single endpoint.
    Http { endpoint: String },

    /// JSON-RPC over a child process's stdin/stdout, line-delimited.
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// A configured remote tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServer {
    /// Stable identifier, used as the session-cache key
    pub id: String,

    /// Human-readable name; sanitized into the tool-name prefix
    pub name: String,

    /// How to reach the server
    #[serde(flatten)]
    pub transport: ServerTransport,

    /// Disabled servers contribute no tools and hold no session
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
