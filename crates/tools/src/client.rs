//! Stdio JSON-RPC client for the tool-host process.
//!
//! The tool-host is a child process (by default the Python SQL tool server)
//! that speaks JSON-RPC 2.0 over stdin/stdout, one message per line. The
//! client owns the process: it is spawned with piped stdio, initialized with
//! the standard handshake, and killed when the client is dropped.
//!
//! Concurrency model: a writer task owns stdin and drains an mpsc queue; a
//! reader task owns stdout and routes replies to per-request oneshot
//! channels keyed by request id. Requests time out individually, so one
//! slow query never wedges the whole connection.

use crate::protocol::{
    CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use sqlsage_core::ToolDescriptor;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Errors from the tool-host transport.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn tool-host '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Tool-host connection closed")]
    ConnectionClosed,

    #[error("Tool-host request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Tool-host reported an error: {0}")]
    Server(String),

    #[error("Tool-host protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(err.to_string())
    }
}

impl From<McpError> for sqlsage_core::Error {
    fn from(err: McpError) -> Self {
        sqlsage_core::Error::Tool(sqlsage_core::ToolError::Transport(err.to_string()))
    }
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, McpError>>>>>;

/// Client end of a spawned tool-host process.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct McpClient {
    write_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    request_timeout: Duration,
    _child: Mutex<Child>,
}

impl McpClient {
    /// Spawn the tool-host and run the initialize handshake.
    ///
    /// The child is killed when the returned client is dropped.
    pub async fn spawn(
        command: &str,
        args: &[String],
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| McpError::Spawn {
            command: command.to_string(),
            reason: "stdin was not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Spawn {
            command: command.to_string(),
            reason: "stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| McpError::Spawn {
            command: command.to_string(),
            reason: "stderr was not captured".to_string(),
        })?;

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: owns stdin, writes queued lines in order.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let alive_writer = Arc::clone(&alive);
        tokio::spawn(async move {
            while let Some(line) = write_rx.recv().await {
                if !alive_writer.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(error) = stdin.write_all(line.as_bytes()).await {
                    warn!(%error, "Tool-host stdin write failed");
                    alive_writer.store(false, Ordering::SeqCst);
                    break;
                }
                if let Err(error) = stdin.flush().await {
                    warn!(%error, "Tool-host stdin flush failed");
                    alive_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        // Reader task: owns stdout, routes replies to waiting requests.
        let pending_reader = Arc::clone(&pending);
        let alive_reader = Arc::clone(&alive);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(message) => match message.id {
                                Some(id) => {
                                    let tx = pending_reader.lock().await.remove(&id);
                                    if let Some(tx) = tx {
                                        let reply = match message.error {
                                            Some(error) => Err(McpError::Server(error.message)),
                                            None => Ok(message.result.unwrap_or(Value::Null)),
                                        };
                                        let _ = tx.send(reply);
                                    } else {
                                        debug!(id, "Tool-host reply had no waiter");
                                    }
                                }
                                None => debug!("Ignoring tool-host notification"),
                            },
                            Err(error) => {
                                debug!(%error, line = trimmed, "Unparseable tool-host output");
                            }
                        }
                    }
                    Err(error) => {
                        warn!(%error, "Tool-host stdout read failed");
                        break;
                    }
                }
            }
            alive_reader.store(false, Ordering::SeqCst);
            // Waking every in-flight request; their oneshot receivers see
            // the drop and surface ConnectionClosed.
            pending_reader.lock().await.clear();
        });

        // Stderr drain: the tool-host logs there, and an undrained pipe
        // would eventually block the child.
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => debug!("toolhost: {}", line.trim_end()),
                }
            }
        });

        let client = Self {
            write_tx,
            pending,
            next_id: AtomicI64::new(1),
            alive,
            request_timeout,
            _child: Mutex::new(child),
        };

        let init = client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "sqlsage",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        match serde_json::from_value::<InitializeResult>(init) {
            Ok(result) => {
                if let Some(server) = result.server_info {
                    info!(name = %server.name, version = %server.version, "Tool-host initialized");
                } else {
                    info!("Tool-host initialized");
                }
            }
            Err(error) => debug!(%error, "Tool-host initialize result was not understood"),
        }
        client.notify("notifications/initialized", json!({})).await?;

        Ok(client)
    }

    /// Whether the transport is still usable.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Ask the tool-host which tools it offers.
    ///
    /// A tool advertised without a schema gets a permissive object schema so
    /// the registry can still validate against it.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let result = self.request("tools/list", json!({})).await?;
        let listing: ListToolsResult = serde_json::from_value(result)?;
        Ok(listing
            .tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name,
                description: tool.description,
                input_schema: tool
                    .input_schema
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
            .collect())
    }

    /// Invoke a remote tool and return its text output.
    ///
    /// A result flagged `isError` becomes `McpError::Server` carrying the
    /// text the tool produced.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let result = self
            .request(
                "tools/call",
                json!({"name": name, "arguments": arguments}),
            )
            .await?;
        let call: CallToolResult = serde_json::from_value(result)?;
        let text = call.text();
        if call.is_error {
            let reason = if text.is_empty() {
                "tool returned an error with no message".to_string()
            } else {
                text
            };
            return Err(McpError::Server(reason));
        }
        Ok(text)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::call(id, method, params);
        let line = format!("{}\n", serde_json::to_string(&request)?);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.write_tx.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    secs: self.request_timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let notification = JsonRpcRequest::notification(method, params);
        let line = format!("{}\n", serde_json::to_string(&notification)?);
        self.write_tx
            .send(line)
            .await
            .map_err(|_| McpError::ConnectionClosed)
    }
}
