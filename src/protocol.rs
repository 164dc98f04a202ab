//! MCP protocol types and message handling.
//!
//! Implements the subset of the Model Context Protocol (MCP) this server
//! speaks, as specified at: https://spec.modelcontextprotocol.io/

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{codes, Error, Result};

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.into()
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version (always "2.0").
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Request ID. Absent or null means 0.
    #[serde(default)]
    pub id: Option<i64>,
    /// Method name.
    pub method: String,
    /// Parameters (if any).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl JsonRpcRequest {
    /// Parse a request envelope, failing fast on anything that cannot be routed.
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidRequest(e.to_string()))?;

        if !value.is_object() {
            return Err(Error::InvalidRequest("request must be a JSON object".into()));
        }

        serde_json::from_value(value).map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    /// The request id, defaulting to 0.
    pub fn id(&self) -> i64 {
        self.id.unwrap_or(0)
    }
}

/// JSON-RPC 2.0 response.
///
/// Only built through the constructors below, so exactly one of `result` and
/// `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version (always "2.0").
    pub jsonrpc: String,
    /// Request ID (matches request).
    pub id: i64,
    /// Result (success case).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (failure case).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: i64, result: impl Serialize) -> Self {
        let result = match serde_json::to_value(result) {
            Ok(Value::Null) | Err(_) => Value::Object(Map::new()),
            Ok(value) => value,
        };
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: i64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Create an error response with data.
    pub fn error_with_data(id: i64, code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }

    /// Create an error response from a server error.
    pub fn from_error(id: i64, error: &Error) -> Self {
        Self::error(id, error.code(), error.to_string())
    }

    /// HTTP status mirroring this response.
    ///
    /// Interaction-required is a pause, not a failure, so it stays 200.
    pub fn http_status(&self) -> u16 {
        match &self.error {
            None => 200,
            Some(error) => match error.code {
                codes::INTERACTION_REQUIRED => 200,
                codes::INVALID_REQUEST | codes::METHOD_NOT_FOUND => 400,
                codes::UNAUTHORIZED => 401,
                _ => 500,
            },
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// MCP-specific protocol types
// ============================================================================

/// MCP initialization request parameters. Only read for logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    /// Client info.
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<ClientInfo>,
}

/// MCP initialization result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
    /// Server info.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Server capabilities. Every capability is advertised as an empty object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Logging capability.
    #[serde(default)]
    pub logging: Map<String, Value>,
    /// Prompts capability.
    #[serde(default)]
    pub prompts: Map<String, Value>,
    /// Resources capability.
    #[serde(default)]
    pub resources: Map<String, Value>,
    /// Tools capability.
    #[serde(default)]
    pub tools: Map<String, Value>,
}

/// Client information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: String,
}

/// Server information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

/// Tool definition for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Input schema (JSON Schema).
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Tool call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Tool call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Result content.
    pub content: Vec<ContentItem>,
    /// Whether the tool encountered an error.
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
        }
    }
}

/// Content item in tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    /// Text content.
    #[serde(rename = "text")]
    Text {
        /// Text value.
        text: String,
    },
}

impl ContentItem {
    /// Create a text content item.
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }
}

/// List tools result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Available tools.
    pub tools: Vec<ToolDefinition>,
}

/// `error.data` of an interaction-required response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionData {
    /// Opaque grant id.
    pub id: String,
    /// Interaction kind, always "url".
    #[serde(rename = "type")]
    pub kind: String,
    /// URL the human must visit.
    pub url: String,
    /// Prompt shown to the human.
    pub message: InteractionMessage,
}

/// Human-readable interaction prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionMessage {
    /// Prompt text.
    pub text: String,
}

impl InteractionData {
    /// URL interaction for a pending grant.
    pub fn url(grant_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: grant_id.into(),
            kind: "url".into(),
            url: url.into(),
            message: InteractionMessage {
                text: "Authorization required. Please open the link to authorize this tool.".into(),
            },
        }
    }
}
