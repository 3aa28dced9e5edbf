//! Main request dispatcher: receives JSON-RPC messages, routes to handlers.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::tools::{CallerIdentity, ProgressReporter, ToolInvocation, ToolRegistry};
use crate::types::*;

use super::negotiation::NegotiatedCapabilities;
use super::validator::validate_request;

/// Transport-supplied context for one incoming message.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Namespace for request ids: the HTTP session id, or a fixed name for stdio.
    pub scope: String,
    pub caller: Option<CallerIdentity>,
    /// Fires when the client connection goes away.
    pub cancel: CancellationToken,
    /// Where progress notifications go, if the transport can stream them.
    pub notifications: Option<UnboundedSender<Value>>,
}

impl RequestContext {
    pub fn new(scope: impl Into<String>, caller: Option<CallerIdentity>) -> Self {
        Self {
            scope: scope.into(),
            caller,
            ..Self::default()
        }
    }

    pub fn with_notifications(mut self, sink: UnboundedSender<Value>) -> Self {
        self.notifications = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

type InFlightKey = (String, RequestId);

/// Removes an in-flight entry however the call ends, including when the
/// transport drops the request future.
struct InFlightGuard<'a> {
    map: &'a DashMap<InFlightKey, CancellationToken>,
    key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// The main protocol handler that dispatches incoming JSON-RPC messages.
pub struct ProtocolHandler {
    registry: Arc<ToolRegistry>,
    capabilities: Mutex<NegotiatedCapabilities>,
    in_flight: DashMap<InFlightKey, CancellationToken>,
}

impl ProtocolHandler {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            capabilities: Mutex::new(NegotiatedCapabilities::default()),
            in_flight: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Number of tool calls currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Cancel every in-flight call in `scope`.
    pub fn cancel_scope(&self, scope: &str) -> usize {
        let mut cancelled = 0;
        for entry in self.in_flight.iter().filter(|e| e.key().0 == scope) {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn cancel_all(&self) {
        for entry in self.in_flight.iter() {
            entry.value().cancel();
        }
    }

    /// Handle one message. Requests always produce a response; notifications
    /// and stray responses produce none.
    pub async fn handle_message(&self, msg: JsonRpcMessage, ctx: RequestContext) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req, ctx).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif, &ctx).await;
                None
            }
            _ => {
                tracing::warn!("Received unexpected message type from client");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest, ctx: RequestContext) -> Value {
        if let Err(e) = validate_request(&request) {
            return serde_json::to_value(e.to_json_rpc_error(request.id)).unwrap_or_default();
        }

        let id = request.id.clone();
        let result = self.dispatch_request(request, ctx).await;

        match result {
            Ok(value) => serde_json::to_value(JsonRpcResponse::new(id, value)).unwrap_or_default(),
            Err(e) => serde_json::to_value(e.to_json_rpc_error(id)).unwrap_or_default(),
        }
    }

    async fn dispatch_request(
        &self,
        request: JsonRpcRequest,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "shutdown" => self.handle_shutdown().await,

            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(request.id, request.params, ctx).await,

            "ping" => Ok(Value::Object(serde_json::Map::new())),

            _ => Err(McpError::MethodNotFound(request.method)),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification, ctx: &RequestContext) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                self.capabilities.lock().await.mark_initialized();
            }
            "notifications/cancelled" | "$/cancelRequest" => {
                let params: Option<CancelledParams> = notification
                    .params
                    .and_then(|p| serde_json::from_value(p).ok());
                let Some(params) = params else {
                    tracing::warn!("Ignoring cancellation without a valid requestId");
                    return;
                };
                let key = (ctx.scope.clone(), params.request_id);
                match self.in_flight.get(&key) {
                    Some(token) => {
                        tracing::info!(
                            id = %key.1,
                            reason = params.reason.as_deref().unwrap_or(""),
                            "Cancelling request"
                        );
                        token.cancel();
                    }
                    None => tracing::debug!(id = %key.1, "Cancellation for unknown or finished request"),
                }
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let init_params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Initialize params required".to_string()))?;

        let mut caps = self.capabilities.lock().await;
        let result = caps.negotiate(init_params)?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_shutdown(&self) -> McpResult<Value> {
        tracing::info!("Shutdown requested; cancelling {} in-flight call(s)", self.in_flight());
        self.cancel_all();
        Ok(Value::Object(serde_json::Map::new()))
    }

    async fn handle_tools_list(&self) -> McpResult<Value> {
        let result = ToolListResult {
            tools: self.registry.list_tools(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        id: RequestId,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        let call_params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Tool call params required".to_string()))?;

        let progress = match (call_params.progress_token(), ctx.notifications) {
            (Some(token), Some(sink)) => ProgressReporter::new(token.clone(), sink),
            _ => ProgressReporter::disabled(),
        };

        let cancel = ctx.cancel.child_token();
        let key = (ctx.scope, id.clone());
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(McpError::InvalidRequest(format!(
                    "request id {id} is already in flight"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let _registered = InFlightGuard {
            map: &self.in_flight,
            key,
        };

        let invocation = ToolInvocation {
            tool: call_params.name,
            arguments: call_params.arguments.unwrap_or(Value::Null),
            correlation_id: id,
            caller: ctx.caller,
        };
        let outcome = self.registry.dispatch(invocation, cancel, progress).await;

        let result = match outcome {
            Ok(value) => ToolCallResult::structured(value),
            Err(e) if e.kind == ToolErrorKind::InvalidArguments => {
                return Err(McpError::InvalidArguments(e));
            }
            Err(e) => ToolCallResult::error(&e),
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }
}
