//! Message framing for newline-delimited JSON.

use serde_json::Value;

use crate::types::{JsonRpcError, JsonRpcMessage, McpError, McpResult, RequestId};

/// Parse one JSON-RPC message. Invalid JSON is a parse error; valid JSON
/// that is not a JSON-RPC message is an invalid request.
pub fn parse_message(text: &str) -> McpResult<JsonRpcMessage> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(McpError::ParseError("Empty message".to_string()));
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| McpError::ParseError(e.to_string()))?;
    if value.is_array() {
        return Err(McpError::InvalidRequest(
            "Batch requests are not supported".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| McpError::InvalidRequest(e.to_string()))
}

/// Serialize a value to a JSON line (with trailing newline).
pub fn frame_message(value: &Value) -> McpResult<String> {
    let mut json = serde_json::to_string(value).map_err(McpError::Json)?;
    json.push('\n');
    Ok(json)
}

/// Error response for a message that could not be parsed, so has no id.
pub fn error_response(err: &McpError) -> Value {
    let error: JsonRpcError = err.to_json_rpc_error(RequestId::Null);
    serde_json::to_value(error).unwrap_or_default()
}
