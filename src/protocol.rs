//! MCP Protocol definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Protocol version announced when the client does not send one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// An inbound JSON-RPC message, classified by shape.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// Method call expecting exactly one response.
    Request(McpRequest),
    /// Method call without an id; never answered.
    Notification(McpNotification),
    /// A response sent by the host (we never issue requests, so these are dropped).
    Response(McpResponse),
}

impl Envelope {
    /// Decode one frame body into an envelope.
    ///
    /// Returns `Error::Serialization` when the body is not JSON at all and
    /// `Error::Protocol` when it is JSON but not a JSON-RPC message.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_slice(body)?;
        Self::try_from(raw)
    }

    /// Method name, if this envelope carries one.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) => None,
        }
    }
}

/// Wire shape before classification. Every field is optional here; the
/// `TryFrom` impl decides which variant the combination denotes.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<McpError>,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = Error;

    fn try_from(raw: RawEnvelope) -> Result<Self> {
        let jsonrpc = raw.jsonrpc.unwrap_or_else(|| "2.0".into());
        let params = match raw.params {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(p) => p,
        };

        match (raw.method, raw.id) {
            (Some(method), Some(id)) => Ok(Envelope::Request(McpRequest {
                jsonrpc,
                id,
                method,
                params,
            })),
            (Some(method), None) => Ok(Envelope::Notification(McpNotification {
                jsonrpc,
                method,
                params,
            })),
            (None, id) if raw.result.is_some() || raw.error.is_some() => {
                Ok(Envelope::Response(McpResponse {
                    jsonrpc,
                    id,
                    result: raw.result,
                    error: raw.error,
                }))
            }
            (None, _) => Err(Error::Protocol(
                "message has neither a method nor a result".into(),
            )),
        }
    }
}

/// MCP JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Method parameters (an empty object when absent).
    #[serde(default)]
    pub params: Value,
}

/// MCP JSON-RPC notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpNotification {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// MCP JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID (matches request; null when the request could not be read).
    pub id: Option<Value>,
    /// Result (on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    /// Create an error response carrying a diagnostic payload.
    pub fn error_with_data(
        id: Option<Value>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    /// Whether this response carries an error object.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// MCP error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Implementation-defined server error, used for unexpected failures.
    pub const SERVER_ERROR: i32 = -32000;
}

/// Parameters of `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    /// Client identity.
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<ClientInfo>,
}

/// Client identity sent with `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallParams {
    /// Tool name.
    #[serde(default)]
    pub name: Option<String>,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Tool definition for MCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tool call result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Content items in the result.
    pub content: Vec<ContentItem>,
    /// Whether this is an error result.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful result with a single text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
        }
    }

    /// An error result with a single text segment.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: true,
        }
    }

    /// Concatenated text of all segments, newline separated.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ContentItem::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content item in tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentItem {
    /// Text content.
    #[serde(rename = "text")]
    Text { text: String },
}

impl ContentItem {
    /// Create a text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Server capabilities for initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

/// Tool-related capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCapabilities {
    /// Whether list_changed notifications are supported.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Server information for initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "embeddenator-council-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let env = Envelope::parse(br#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        match env {
            Envelope::Request(req) => {
                assert_eq!(req.id, json!(7));
                assert_eq!(req.method, "ping");
                assert_eq!(req.params, json!({}));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification() {
        let env =
            Envelope::parse(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(env, Envelope::Notification(_)));
        assert_eq!(env.method(), Some("notifications/initialized"));
    }

    #[test]
    fn test_parse_host_response() {
        let env = Envelope::parse(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(matches!(env, Envelope::Response(_)));
        assert_eq!(env.method(), None);
    }

    #[test]
    fn test_parse_rejects_shapeless_object() {
        let err = Envelope::parse(br#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = Envelope::parse(b"not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let value = serde_json::to_value(ToolCallResult::error("boom")).unwrap();
        assert_eq!(
            value,
            json!({"content": [{"type": "text", "text": "boom"}], "isError": true})
        );
    }

    #[test]
    fn test_error_response_keeps_null_id() {
        let resp = McpResponse::error(None, error_codes::PARSE_ERROR, "bad");
        let value = serde_json::to_value(resp).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(-32700));
    }
}
