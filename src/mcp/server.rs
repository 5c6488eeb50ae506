//! MCP Server Implementation
//!
//! Newline-delimited JSON-RPC over any async reader/writer pair, stdio in
//! production. Requests other than `tools/call` are answered in arrival
//! order. Every `tools/call` runs in its own task so slow answers do not
//! block the connection, and `notifications/cancelled` aborts the matching
//! call without writing a response for it.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult>;
}

/// Connection state tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

struct RegisteredTool {
    definition: Tool,
    handler: Arc<dyn ToolHandler>,
}

type SharedWriter<W> = Arc<AsyncMutex<W>>;
type InFlight = Arc<Mutex<HashMap<RequestId, AbortHandle>>>;

/// MCP Server state and configuration
pub struct McpServer {
    /// Server implementation information
    pub server_info: Implementation,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    instructions: Option<String>,
    tools: RwLock<Vec<RegisteredTool>>,
    connection_state: RwLock<ConnectionState>,
}

impl McpServer {
    /// Create a new MCP server
    #[inline]
    pub fn new(name: String, version: String) -> Self {
        Self {
            server_info: Implementation { name, version },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            instructions: None,
            tools: RwLock::new(Vec::new()),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
        }
    }

    /// Instructions returned to the client on initialize
    #[inline]
    pub fn with_instructions(mut self, instructions: String) -> Self {
        self.instructions = Some(instructions);
        self
    }

    /// Register a tool with the server, replacing any tool of the same name
    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();
        let mut tools = self.tools.write().await;
        tools.retain(|registered| registered.definition.name != tool_name);
        tools.push(RegisteredTool {
            definition: tool,
            handler: Arc::new(handler),
        });
        debug!("Registered tool: {}", tool_name);
    }

    /// Get current connection state
    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        self.connection_state.read().await.clone()
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.write().await = state;
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> anyhow::Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection until the reader reaches EOF.
    ///
    /// Tool calls still running at EOF are awaited before returning.
    #[inline]
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer: SharedWriter<W> = Arc::new(AsyncMutex::new(writer));
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let message = match parse_message(trimmed) {
                        Ok(message) => message,
                        Err(e) => {
                            e.log();
                            send_message(&writer, &e.to_error_response(None)).await?;
                            continue;
                        }
                    };

                    match message {
                        JsonRpcMessage::Request(request) if request.method == "tools/call" => {
                            self.spawn_tool_call(request, &writer, &in_flight, &mut tasks);
                        }
                        JsonRpcMessage::Request(request) => {
                            let id = request.id.clone();
                            let response = match self.handle_request(request).await {
                                Ok(result) => {
                                    JsonRpcMessage::Response(JsonRpcResponse::new(result, id))
                                }
                                Err(e) => {
                                    e.log();
                                    e.to_error_response(Some(id))
                                }
                            };
                            send_message(&writer, &response).await?;
                        }
                        JsonRpcMessage::Notification(notification) => {
                            self.handle_notification(notification, &in_flight).await;
                        }
                        JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_) => {
                            warn!("Received unexpected response message from client");
                        }
                    }

                    // Reap finished tool calls
                    while let Some(result) = tasks.try_join_next() {
                        log_task_result(result);
                    }
                }
                Err(e) => {
                    error!("Error reading from input: {}", e);
                    break;
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }

        self.set_connection_state(ConnectionState::Closed).await;
        info!("MCP server stopped");
        Ok(())
    }

    fn spawn_tool_call<W>(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        writer: &SharedWriter<W>,
        in_flight: &InFlight,
        tasks: &mut JoinSet<()>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let server = Arc::clone(self);
        let writer = Arc::clone(writer);
        let registry = Arc::clone(in_flight);
        let id = request.id.clone();

        // Hold the registry lock until the handle is stored so the task
        // cannot finish and deregister before it is registered.
        let mut pending = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tasks.spawn(async move {
            let id = request.id.clone();
            let response = match server.handle_call_tool(request.params).await {
                Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, id.clone())),
                Err(e) => {
                    e.log();
                    e.to_error_response(Some(id.clone()))
                }
            };

            let still_pending = registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
                .is_some();
            if !still_pending {
                debug!("Request {} was cancelled, dropping its response", id);
                return;
            }

            if let Err(e) = send_message(&writer, &response).await {
                error!("Failed to write response for request {}: {}", id, e);
            }
        });
        if pending.insert(id.clone(), handle).is_some() {
            warn!("Duplicate in-flight request id {}", id);
        }
    }

    /// Handle a JSON-RPC request other than `tools/call`
    async fn handle_request(&self, request: JsonRpcRequest) -> McpResult<Value> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools().await,
            "ping" => Ok(serde_json::json!({})),
            _ => Err(McpError::MethodNotFound {
                method: request.method,
            }),
        }
    }

    /// Handle a JSON-RPC notification
    async fn handle_notification(&self, notification: JsonRpcNotification, in_flight: &InFlight) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                self.set_connection_state(ConnectionState::Ready).await;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => {
                let params = notification
                    .params
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                let Some(params) = params else {
                    warn!("Cancellation notification without a valid requestId");
                    return;
                };

                let handle = in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&params.request_id);
                match handle {
                    Some(handle) => {
                        handle.abort();
                        info!(
                            "Cancelled request {} ({})",
                            params.request_id,
                            params.reason.as_deref().unwrap_or("no reason given")
                        );
                    }
                    None => debug!(
                        "Cancellation for unknown or finished request {}",
                        params.request_id
                    ),
                }
            }
            _ => {
                warn!("Unknown notification method: {}", notification.method);
            }
        }
    }

    /// Handle initialize request
    #[inline]
    pub async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = match params {
            Some(p) => serde_json::from_value(p)?,
            None => {
                return Err(McpError::InvalidParameters {
                    message: "Initialize request missing parameters".to_string(),
                });
            }
        };

        // Answer with the client's version when supported, otherwise our latest
        let protocol_version = if SUPPORTED_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version.clone()
        } else {
            warn!(
                "Client requested unsupported protocol version {}, offering {}",
                params.protocol_version, MCP_VERSION
            );
            MCP_VERSION.to_string()
        };

        self.set_connection_state(ConnectionState::Initializing)
            .await;

        let result = InitializeResult {
            protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };

        info!("Client initialized: {}", params.client_info.name);
        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: e.to_string(),
        })
    }

    /// Handle list tools request
    #[inline]
    pub async fn handle_list_tools(&self) -> McpResult<Value> {
        let tools = self.tools.read().await;
        let result = ListToolsResult {
            tools: tools.iter().map(|t| t.definition.clone()).collect(),
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: e.to_string(),
        })
    }

    /// Handle call tool request
    #[inline]
    pub async fn handle_call_tool(&self, params: Option<Value>) -> McpResult<Value> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p)?,
            None => {
                return Err(McpError::InvalidParameters {
                    message: "Tool call request missing parameters".to_string(),
                });
            }
        };

        let handler = {
            let tools = self.tools.read().await;
            tools
                .iter()
                .find(|t| t.definition.name == params.name)
                .map(|t| Arc::clone(&t.handler))
                .ok_or_else(|| McpError::ToolNotFound {
                    name: params.name.clone(),
                })?
        };

        let result = handler.handle(params).await?;
        serde_json::to_value(result).map_err(|e| McpError::InternalError {
            message: e.to_string(),
        })
    }
}

fn parse_message(line: &str) -> McpResult<JsonRpcMessage> {
    let raw_value: Value = serde_json::from_str(line).map_err(|e| McpError::ParseError {
        message: format!("Parse error: {}", e),
    })?;

    if raw_value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(McpError::InvalidRequest {
            message: "Invalid Request: jsonrpc must be \"2.0\"".to_string(),
        });
    }

    serde_json::from_value(raw_value).map_err(|e| McpError::InvalidRequest {
        message: format!("Invalid Request: {}", e),
    })
}

/// Send a message to the client as one line
async fn send_message<W>(writer: &SharedWriter<W>, message: &JsonRpcMessage) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');

    let mut writer = writer.lock().await;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("Tool call task aborted"),
        Err(e) => error!("Tool call task failed: {}", e),
    }
}
