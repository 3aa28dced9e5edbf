//! Error types and JSON-RPC error codes for the MCP server.

use serde_json::json;

use daa_core::DaaError;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP-specific error codes.
pub mod mcp_error_codes {
    /// Server: Unauthorized (missing or invalid bearer token).
    pub const UNAUTHORIZED: i32 = -32900;
    /// Server: unknown or expired `Mcp-Session-Id`.
    pub const SESSION_NOT_FOUND: i32 = -32901;
}

/// Stable classification of a failed tool call, exposed to clients as `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    InvalidArguments,
    AuthenticationFailed,
    UpstreamUnavailable,
    ParseError,
    ToolExecutionError,
    Cancelled,
    Timeout,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::InvalidArguments => "InvalidArguments",
            ToolErrorKind::AuthenticationFailed => "AuthenticationFailed",
            ToolErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ToolErrorKind::ParseError => "ParseError",
            ToolErrorKind::ToolExecutionError => "ToolExecutionError",
            ToolErrorKind::Cancelled => "Cancelled",
            ToolErrorKind::Timeout => "Timeout",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool call that ended in a terminal error state.
///
/// `reference` is set only for [`ToolErrorKind::ToolExecutionError`]: the
/// detail stays in the server log under that id and the client sees only the
/// id.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    pub reference: Option<String>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            reference: None,
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::AuthenticationFailed, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ToolErrorKind::Cancelled, "request cancelled")
    }

    pub fn timeout(tool: &str, after: std::time::Duration) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("tool '{tool}' did not finish within {}s", after.as_secs_f32()),
        )
    }

    /// Internal failure with its detail replaced by an opaque reference.
    /// The detail is logged here and never leaves the server.
    pub fn internal(tool: &str, detail: impl std::fmt::Display) -> Self {
        let reference = uuid::Uuid::new_v4().simple().to_string();
        tracing::error!(tool, reference = %reference, "Tool execution failed: {detail}");
        Self {
            kind: ToolErrorKind::ToolExecutionError,
            message: format!("tool '{tool}' failed; see server log for reference {reference}"),
            reference: Some(reference),
        }
    }

    /// `structuredContent` payload for an error tool result.
    pub fn to_structured(&self) -> serde_json::Value {
        let mut value = json!({
            "kind": self.kind.as_str(),
            "message": self.message,
        });
        if let Some(reference) = &self.reference {
            value["reference"] = json!(reference);
        }
        value
    }
}

impl From<DaaError> for ToolError {
    fn from(err: DaaError) -> Self {
        let kind = match &err {
            DaaError::AuthenticationFailed(_) | DaaError::SessionRejected => {
                ToolErrorKind::AuthenticationFailed
            }
            DaaError::PortalUnavailable(_)
            | DaaError::UpstreamUnavailable { .. }
            | DaaError::Retrieval(_) => ToolErrorKind::UpstreamUnavailable,
            DaaError::Parse { .. } => ToolErrorKind::ParseError,
            DaaError::InvalidInput(_) => ToolErrorKind::InvalidArguments,
            DaaError::Cancelled => ToolErrorKind::Cancelled,
            DaaError::Config(_) | DaaError::Io(_) => ToolErrorKind::ToolExecutionError,
        };
        Self::new(kind, err.to_string())
    }
}

/// All errors that can occur in the MCP server.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// A tool call rejected before its handler ran.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(ToolError),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Duplicate tool registration: {0}")]
    DuplicateTool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] DaaError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unauthorized: missing or invalid bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) | McpError::Json(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::InvalidArguments(_) => INVALID_PARAMS,
            McpError::Unauthorized => UNAUTHORIZED,
            McpError::SessionNotFound(_) => SESSION_NOT_FOUND,
            McpError::InternalError(_)
            | McpError::DuplicateTool(_)
            | McpError::Config(_)
            | McpError::Core(_)
            | McpError::Transport(_)
            | McpError::Io(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        let data = match self {
            McpError::InvalidArguments(err) => Some(json!({ "kind": err.kind.as_str() })),
            _ => None,
        };
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data,
            },
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
