//! MCP server: the framed read loop and the method dispatcher.
//!
//! Requests are handled one at a time. A frame is read, its handler runs to
//! completion (including every network or subprocess call it triggers), the
//! response is written, and only then is the next frame read.

use std::io::{Read, Write};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::bridge::ExecutionBridge;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::gateway::ModelGateway;
use crate::orchestrator::AgentOrchestrator;
use crate::protocol::{
    error_codes, Envelope, InitializeParams, McpNotification, McpRequest, McpResponse,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolCapabilities, DEFAULT_PROTOCOL_VERSION,
};
use crate::tools::{ToolContext, ToolRegistry};
use crate::transport::{write_frame, FrameReader};

/// Agent MCP Server.
pub struct AgentMcpServer {
    /// Tool registry.
    registry: ToolRegistry,
    /// Server info.
    server_info: ServerInfo,
    /// Whether the client has sent `initialized`.
    initialized: bool,
}

impl AgentMcpServer {
    /// Create a server around a prepared registry.
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            server_info: ServerInfo::default(),
            initialized: false,
        }
    }

    /// Wire up orchestrator, bridge and registry from a config.
    pub fn from_config(config: ServerConfig, gateway: Arc<dyn ModelGateway>) -> Self {
        let orchestrator = AgentOrchestrator::with_config(gateway, config.orchestrator);
        let bridge = ExecutionBridge::new(config.bridge);
        let context = ToolContext::new(orchestrator, bridge);
        Self::new(ToolRegistry::for_surface(context, config.surface))
    }

    /// Whether the client has completed the initialize handshake.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run the server on stdio.
    pub async fn run_stdio(&mut self) -> Result<()> {
        info!("Starting council MCP server on stdio");
        self.run(std::io::stdin(), std::io::stdout()).await
    }

    /// Serve frames from `reader` until it reports end of stream.
    ///
    /// Only I/O failures on the streams themselves end the loop with an error.
    pub async fn run<R: Read, W: Write>(&mut self, reader: R, mut writer: W) -> Result<()> {
        let mut frames = FrameReader::new(reader);

        while let Some(body) = frames.read_frame()? {
            debug!(bytes = body.len(), "Received frame");

            if let Some(response) = self.handle_frame(&body).await {
                let encoded = serde_json::to_vec(&response)?;
                debug!(bytes = encoded.len(), is_error = response.is_error(), "Sending response");
                write_frame(&mut writer, &encoded)?;
            }
        }

        info!("Input stream closed, shutting down");
        Ok(())
    }

    /// Handle one frame body. `None` means nothing is written back.
    pub async fn handle_frame(&mut self, body: &[u8]) -> Option<McpResponse> {
        let envelope = match Envelope::parse(body) {
            Ok(envelope) => envelope,
            Err(Error::Serialization(e)) => {
                error!("Failed to parse message: {}", e);
                return Some(McpResponse::error(None, error_codes::PARSE_ERROR, e.to_string()));
            }
            Err(e) => {
                warn!("Invalid message: {}", e);
                return Some(McpResponse::error(None, error_codes::INVALID_REQUEST, e.to_string()));
            }
        };

        match envelope {
            Envelope::Request(request) => self.handle_request(request).await,
            Envelope::Notification(notification) => {
                self.handle_notification(&notification);
                None
            }
            Envelope::Response(response) => {
                debug!(id = ?response.id, "Dropping response from host");
                None
            }
        }
    }

    async fn handle_request(&mut self, request: McpRequest) -> Option<McpResponse> {
        // Notification-style methods stay silent even when sent with an id.
        if is_initialized_method(&request.method) {
            self.mark_initialized();
            return None;
        }

        let id = request.id.clone();
        let outcome = AssertUnwindSafe(self.dispatch(&request)).catch_unwind().await;

        let response = match outcome {
            Ok(Ok(result)) => McpResponse::success(Some(id), result),
            Ok(Err(Error::InvalidParams(message))) => {
                warn!(method = %request.method, "Invalid params: {}", message);
                McpResponse::error(Some(id), error_codes::INVALID_PARAMS, message)
            }
            Ok(Err(Error::Protocol(message))) => {
                McpResponse::error(Some(id), error_codes::METHOD_NOT_FOUND, message)
            }
            Ok(Err(e)) => {
                error!(method = %request.method, "Request failed: {}", e);
                server_error(Some(id), &e)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(method = %request.method, "Handler panicked: {}", message);
                server_error(Some(id), &Error::Internal(message))
            }
        };
        Some(response)
    }

    /// Route a request by method name.
    async fn dispatch(&self, request: &McpRequest) -> Result<Value> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(&request.params),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(&request.params).await,
            "ping" => Ok(json!({})),
            other => Err(Error::Protocol(format!("method not found: {}", other))),
        }
    }

    fn handle_notification(&mut self, notification: &McpNotification) {
        match notification.method.as_str() {
            m if is_initialized_method(m) => self.mark_initialized(),
            "notifications/cancelled" => {
                info!(params = %notification.params, "Host cancelled a request");
            }
            other => debug!(method = other, "Ignoring notification"),
        }
    }

    fn mark_initialized(&mut self) {
        self.initialized = true;
        info!("MCP session initialized");
    }

    /// Handle initialize request.
    fn handle_initialize(&self, params: &Value) -> Result<Value> {
        let params: InitializeParams = serde_json::from_value(params.clone()).unwrap_or_default();
        if let Some(client) = &params.client_info {
            info!(client = %client.name, version = ?client.version, "Initializing MCP server");
        }

        let capabilities = ServerCapabilities {
            tools: Some(ToolCapabilities { list_changed: false }),
        };
        let protocol_version = params
            .protocol_version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string());

        Ok(json!({
            "protocolVersion": protocol_version,
            "capabilities": capabilities,
            "serverInfo": self.server_info
        }))
    }

    /// Handle tools/list request.
    fn handle_tools_list(&self) -> Result<Value> {
        Ok(json!({ "tools": self.registry.definitions() }))
    }

    /// Handle tools/call request.
    async fn handle_tools_call(&self, params: &Value) -> Result<Value> {
        let params: ToolCallParams = serde_json::from_value(params.clone())
            .map_err(|e| Error::InvalidParams(e.to_string()))?;

        let name = params
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidParams("missing tool name".into()))?;
        let arguments = params.arguments.unwrap_or_else(|| json!({}));

        let result = self.registry.execute(name, arguments).await;
        Ok(serde_json::to_value(result)?)
    }
}

fn is_initialized_method(method: &str) -> bool {
    matches!(method, "initialized" | "notifications/initialized")
}

/// A `-32000` response carrying the error message and its cause chain.
pub fn server_error(id: Option<Value>, err: &Error) -> McpResponse {
    McpResponse::error_with_data(
        id,
        error_codes::SERVER_ERROR,
        err.to_string(),
        Some(json!({
            "message": err.to_string(),
            "trace": err.trace(),
        })),
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
