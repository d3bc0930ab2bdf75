//! Tool-server sessions — JSON-RPC over HTTP or a child process's stdio.
//!
//! A session supports two operations: `tools/list` and `tools/call`.
//! Process sessions perform an initialize handshake on spawn and drain
//! the child's stderr into the log so server-side errors are visible.

use async_trait::async_trait;
use serde_json::{Value, json};
use spindle_core::error::RegistryError;
use spindle_core::server::{ServerTransport, ToolServer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::warn;

/// Timeout for a single JSON-RPC round-trip (request + response).
const RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the initial process handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum size (in bytes) for a single stdio response line.
const MAX_RESPONSE_BYTES: usize = 512 * 1024;

/// An established connection to a tool server.
///
/// Trait-backed so tests (and embedders) can inject fakes via
/// [`crate::ToolRegistry::with_session`].
#[async_trait]
pub trait ToolServerConnection: Send + Sync {
    /// Raw tool descriptors as the server reports them
    /// (`{name, description, inputSchema}` objects).
    async fn list_tools(&self) -> Result<Vec<Value>, RegistryError>;

    /// Invoke a tool by its server-side name; returns flattened text.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, RegistryError>;

    /// Tear down the session (kill the child process, drop the client).
    async fn shutdown(&self);
}

enum Transport {
    Http {
        client: reqwest::Client,
        endpoint: String,
    },
    Process {
        stdin: Mutex<ChildStdin>,
        stdout: Mutex<BufReader<ChildStdout>>,
        child: Mutex<Option<Child>>,
    },
}

/// A live JSON-RPC session with one tool server.
pub struct ServerSession {
    server_id: String,
    transport: Transport,
    next_id: AtomicU64,
}

impl ServerSession {
    /// Establish a session for the given server descriptor.
    pub async fn connect(server: &ToolServer) -> Result<Self, RegistryError> {
        let transport = match &server.transport {
            ServerTransport::Http { endpoint } => {
                let client = reqwest::Client::builder()
                    .timeout(RPC_TIMEOUT)
                    .build()
                    .map_err(|e| RegistryError::ConnectFailed {
                        server: server.id.clone(),
                        reason: e.to_string(),
                    })?;
                Transport::Http {
                    client,
                    endpoint: endpoint.clone(),
                }
            }
            ServerTransport::Process { command, args } => {
                Self::spawn_process(&server.id, command, args).await?
            }
        };

        let session = Self {
            server_id: server.id.clone(),
            transport,
            next_id: AtomicU64::new(1),
        };

        // Process servers expect an initialize round-trip before use.
        if matches!(session.transport, Transport::Process { .. }) {
            tokio::time::timeout(
                INIT_TIMEOUT,
                session.request(
                    "initialize",
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": { "name": "spindle", "version": env!("CARGO_PKG_VERSION") }
                    }),
                ),
            )
            .await
            .map_err(|_| RegistryError::ConnectFailed {
                server: session.server_id.clone(),
                reason: format!("initialization timed out after {INIT_TIMEOUT:?}"),
            })??;
        }

        Ok(session)
    }

    async fn spawn_process(
        server_id: &str,
        command: &str,
        args: &[String],
    ) -> Result<Transport, RegistryError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RegistryError::ConnectFailed {
                server: server_id.to_string(),
                reason: format!("spawn '{command}': {e}"),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| RegistryError::ConnectFailed {
            server: server_id.to_string(),
            reason: "failed to capture server stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| RegistryError::ConnectFailed {
            server: server_id.to_string(),
            reason: "failed to capture server stdout".into(),
        })?;

        // Drain stderr into the log so server errors are visible rather
        // than silently swallowed.
        if let Some(stderr) = child.stderr.take() {
            let id = server_id.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let trimmed = line.trim_end();
                            if !trimmed.is_empty() {
                                warn!(server = %id, "{}", trimmed);
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        Ok(Transport::Process {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(Some(child)),
        })
    }

    /// Send one JSON-RPC request and await its result.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RegistryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = match &self.transport {
            Transport::Http { client, endpoint } => {
                let resp = client
                    .post(endpoint)
                    .json(&envelope)
                    .send()
                    .await
                    .map_err(|e| self.rpc_error(method, e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(self.rpc_error(method, format!("HTTP status {status}")));
                }
                resp.json::<Value>()
                    .await
                    .map_err(|e| self.rpc_error(method, format!("invalid JSON body: {e}")))?
            }
            Transport::Process { stdin, stdout, .. } => {
                let mut line = serde_json::to_string(&envelope)
                    .map_err(|e| self.rpc_error(method, e.to_string()))?;
                line.push('\n');

                let round_trip = async {
                    {
                        let mut stdin = stdin.lock().await;
                        stdin
                            .write_all(line.as_bytes())
                            .await
                            .map_err(|e| self.rpc_error(method, e.to_string()))?;
                        stdin
                            .flush()
                            .await
                            .map_err(|e| self.rpc_error(method, e.to_string()))?;
                    }

                    let mut response_line = String::new();
                    {
                        let mut stdout = stdout.lock().await;
                        let bytes = stdout
                            .read_line(&mut response_line)
                            .await
                            .map_err(|e| self.rpc_error(method, e.to_string()))?;
                        if bytes == 0 {
                            return Err(self.rpc_error(method, "server closed stdout".into()));
                        }
                    }
                    if response_line.len() > MAX_RESPONSE_BYTES {
                        return Err(self.rpc_error(
                            method,
                            format!(
                                "response exceeded size limit ({} > {} bytes)",
                                response_line.len(),
                                MAX_RESPONSE_BYTES
                            ),
                        ));
                    }
                    serde_json::from_str::<Value>(&response_line)
                        .map_err(|e| self.rpc_error(method, format!("invalid JSON line: {e}")))
                };

                tokio::time::timeout(RPC_TIMEOUT, round_trip)
                    .await
                    .map_err(|_| {
                        self.rpc_error(method, format!("timed out after {RPC_TIMEOUT:?}"))
                    })??
            }
        };

        if let Some(error) = response.get("error") {
            return Err(self.rpc_error(method, error.to_string()));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    fn rpc_error(&self, method: &str, reason: String) -> RegistryError {
        RegistryError::RpcFailed {
            server: self.server_id.clone(),
            reason: format!("rpc '{method}': {reason}"),
        }
    }
}

#[async_trait]
impl ToolServerConnection for ServerSession {
    async fn list_tools(&self) -> Result<Vec<Value>, RegistryError> {
        let result = self.request("tools/list", json!({})).await?;
        Ok(result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, RegistryError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;

        // Servers return content as an array of content blocks; flatten
        // the text blocks into one string.
        if let Some(content) = result.get("content").and_then(Value::as_array) {
            let texts: Vec<&str> = content
                .iter()
                .filter_map(|c| c.get("text").and_then(Value::as_str))
                .collect();
            Ok(texts.join("\n"))
        } else {
            Ok(result.to_string())
        }
    }

    async fn shutdown(&self) {
        if let Transport::Process { child, .. } = &self.transport {
            if let Some(mut child) = child.lock().await.take() {
                let _ = child.kill().await;
            }
        }
    }
}
