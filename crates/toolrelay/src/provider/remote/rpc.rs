//! JSON-RPC 2.0 messages exchanged with a remote tool server.
//!
//! Messages are newline-delimited JSON. Requests carry a numeric id that the
//! server echoes in its response; messages without an id are notifications.

use serde::{Deserialize, Serialize};

use crate::catalog::{ProviderKind, ToolDescriptor};

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_LIST_TOOLS: &str = "list_tools";
pub const METHOD_INVOKE_TOOL: &str = "invoke_tool";

/// Request sent to the remote server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Response correlated to a request by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated message that expects no reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Any message the server may write.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response(RpcResponse),
    /// Server-initiated call. The client serves no methods.
    Request(RpcRequest),
    Notification(RpcNotification),
}

impl IncomingMessage {
    /// Classify one line. A message carrying `method` is never a response,
    /// even when it also carries an `id`.
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some_and(|id| !id.is_null());
        match (has_method, has_id) {
            (true, true) => serde_json::from_value(value).map(IncomingMessage::Request),
            (true, false) => serde_json::from_value(value).map(IncomingMessage::Notification),
            (false, _) => serde_json::from_value(value).map(IncomingMessage::Response),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub mod error_codes {
    /// Also used for unknown tool ids.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    /// The tool ran and failed (application-defined).
    pub const TOOL_EXECUTION_ERROR: i64 = -32000;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeToolParams {
    pub tool_id: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeToolResult {
    pub output: serde_json::Value,
}

/// One entry of a `list_tools` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<RemoteToolInfo>,
}

impl RemoteToolInfo {
    pub fn into_descriptor(self, default_priority: i32) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name,
            provider_kind: ProviderKind::Remote,
            priority: self.priority.unwrap_or(default_priority),
            parameter_schema: self.input_schema,
            category: self.category,
            description: self.description,
        }
    }
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

impl RpcResponse {
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }
}
