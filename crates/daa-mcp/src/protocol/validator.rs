//! JSON-RPC message validation per MCP spec.

use serde_json::Value;

use crate::types::{JsonRpcRequest, McpError, McpResult, JSONRPC_VERSION};

/// Validate that a JSON-RPC request is well-formed.
pub fn validate_request(request: &JsonRpcRequest) -> McpResult<()> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::InvalidRequest(format!(
            "Expected jsonrpc version \"{JSONRPC_VERSION}\", got \"{}\"",
            request.jsonrpc
        )));
    }

    if request.method.is_empty() {
        return Err(McpError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }

    if request.method.starts_with("rpc.") {
        return Err(McpError::InvalidRequest(format!(
            "Method name \"{}\" is reserved",
            request.method
        )));
    }

    // JSON-RPC allows positional params; MCP methods only take named ones.
    match &request.params {
        None | Some(Value::Object(_)) | Some(Value::Null) => Ok(()),
        Some(_) => Err(McpError::InvalidRequest(
            "params must be an object".to_string(),
        )),
    }
}
