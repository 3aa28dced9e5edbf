//! Tool registration and dispatch.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::types::{McpError, McpResult, RequestId, ToolDefinition, ToolError, ToolErrorKind};

use super::context::{CallerIdentity, ProgressReporter, ToolContext};

/// Static description of a tool. Immutable once registered.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON Schema for `arguments`; compiled at registration.
    pub input_schema: Value,
    pub output_schema: Value,
}

impl ToolSpec {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.to_string(),
            description: Some(self.description.to_string()),
            input_schema: self.input_schema.clone(),
            output_schema: Some(self.output_schema.clone()),
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// `args` has already passed the tool's input schema.
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError>;
}

/// One `tools/call`, created per request.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub correlation_id: RequestId,
    pub caller: Option<CallerIdentity>,
}

/// Lifecycle of an invocation. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Received,
    Validated,
    Executing,
    Completed,
    Failed,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Completed | InvocationState::Failed)
    }

    pub fn can_advance_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Received, Validated | Failed)
                | (Validated, Executing | Failed)
                | (Executing, Completed | Failed)
        )
    }
}

/// Logs each state transition of one invocation.
struct InvocationTrace<'a> {
    tool: &'a str,
    id: &'a RequestId,
    state: InvocationState,
    started: Instant,
}

impl<'a> InvocationTrace<'a> {
    fn new(tool: &'a str, id: &'a RequestId) -> Self {
        tracing::debug!(tool, id = %id, "Invocation received");
        Self {
            tool,
            id,
            state: InvocationState::Received,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: InvocationState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(tool = self.tool, id = %self.id, from = ?self.state, to = ?next, "Invocation state");
        self.state = next;
    }

    fn finish(&mut self, outcome: &Result<Value, ToolError>) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match outcome {
            Ok(_) => {
                self.advance(InvocationState::Completed);
                tracing::info!(tool = self.tool, id = %self.id, elapsed_ms, "Tool call completed");
            }
            Err(e) => {
                self.advance(InvocationState::Failed);
                tracing::warn!(tool = self.tool, id = %self.id, elapsed_ms, kind = %e.kind, "Tool call failed");
            }
        }
    }
}

struct RegisteredTool {
    spec: ToolSpec,
    schema: JSONSchema,
    handler: Arc<dyn ToolHandler>,
}

/// Registered tools, in registration order, plus the per-call timeout.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            timeout,
        }
    }

    /// Register a tool. A duplicate name or an input schema that does not
    /// compile is a configuration error.
    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) -> McpResult<()> {
        if self.contains(spec.name) {
            return Err(McpError::DuplicateTool(spec.name.to_string()));
        }
        let schema = JSONSchema::compile(&spec.input_schema).map_err(|e| {
            McpError::Config(format!("invalid input schema for tool '{}': {e}", spec.name))
        })?;
        tracing::debug!("Registered tool {}", spec.name);
        self.tools.push(RegisteredTool {
            spec,
            schema,
            handler,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.spec.definition()).collect()
    }

    fn find(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.spec.name == name)
    }

    /// Validate and run one invocation.
    ///
    /// The handler runs in its own task with a child of `cancel`. The call
    /// always ends in a terminal state: within the registry timeout, or
    /// promptly after `cancel` fires.
    pub async fn dispatch(
        &self,
        invocation: ToolInvocation,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> Result<Value, ToolError> {
        let ToolInvocation {
            tool: name,
            arguments,
            correlation_id,
            caller,
        } = invocation;
        let mut trace = InvocationTrace::new(&name, &correlation_id);

        let outcome = self
            .run(&name, arguments, caller, cancel, progress, &mut trace)
            .await;
        trace.finish(&outcome);
        outcome
    }

    async fn run(
        &self,
        name: &str,
        arguments: Value,
        caller: Option<CallerIdentity>,
        cancel: CancellationToken,
        progress: ProgressReporter,
        trace: &mut InvocationTrace<'_>,
    ) -> Result<Value, ToolError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolError::invalid_arguments(format!("unknown tool '{name}'")))?;
        let args = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        validate_arguments(&tool.schema, &args)?;
        trace.advance(InvocationState::Validated);

        if cancel.is_cancelled() {
            return Err(ToolError::cancelled());
        }

        let handler_cancel = cancel.child_token();
        let ctx = ToolContext {
            caller,
            cancel: handler_cancel.clone(),
            progress,
        };
        let handler = Arc::clone(&tool.handler);

        trace.advance(InvocationState::Executing);
        let mut task = tokio::spawn(async move { handler.call(args, ctx).await });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handler_cancel.cancel();
                task.abort();
                Err(ToolError::cancelled())
            }
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(ToolError::internal(
                    name,
                    format!("handler panicked: {}", panic_message(e.into_panic())),
                )),
                Err(e) => Err(ToolError::internal(name, e)),
            },
            _ = tokio::time::sleep(self.timeout) => {
                handler_cancel.cancel();
                task.abort();
                Err(ToolError::timeout(name, self.timeout))
            }
        };

        // Internal failures reported by the handler itself still get an opaque reference.
        outcome.map_err(|e| match (e.kind, &e.reference) {
            (ToolErrorKind::ToolExecutionError, None) => ToolError::internal(name, e.message),
            _ => e,
        })
    }
}

fn validate_arguments(schema: &JSONSchema, args: &Value) -> Result<(), ToolError> {
    let Err(errors) = schema.validate(args) else {
        return Ok(());
    };
    let messages: Vec<String> = errors
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{path}: {e}")
            }
        })
        .collect();
    Err(ToolError::invalid_arguments(messages.join("; ")))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "echo": args["text"] }))
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        async fn call(&self, _args: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
            panic!("secret internal detail");
        }
    }

    struct Sleeps {
        saw_cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ToolHandler for Sleeps {
        async fn call(&self, _args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    Err(ToolError::cancelled())
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!({})),
            }
        }
    }

    fn spec(name: &'static str) -> ToolSpec {
        ToolSpec {
            name,
            description: "test tool",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "repeat": { "type": "integer", "minimum": 1, "maximum": 3 }
                },
                "required": ["text"],
                "additionalProperties": false
            }),
            output_schema: json!({"type": "object"}),
        }
    }

    fn open_spec(name: &'static str) -> ToolSpec {
        ToolSpec {
            input_schema: json!({"type": "object"}),
            ..spec(name)
        }
    }

    fn invocation(tool: &str, arguments: Value) -> ToolInvocation {
        ToolInvocation {
            tool: tool.to_string(),
            arguments,
            correlation_id: RequestId::Number(1),
            caller: None,
        }
    }

    fn echo_registry(calls: &Arc<AtomicUsize>) -> ToolRegistry {
        let mut registry = ToolRegistry::new(Duration::from_secs(5));
        registry
            .register(spec("echo"), Arc::new(Echo { calls: Arc::clone(calls) }))
            .unwrap();
        registry
    }

    #[test]
    fn state_machine_only_moves_forward() {
        use InvocationState::*;
        assert!(Received.can_advance_to(Validated));
        assert!(Validated.can_advance_to(Executing));
        assert!(Executing.can_advance_to(Completed));
        assert!(Received.can_advance_to(Failed));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Executing.can_advance_to(Validated));
        assert!(!Received.can_advance_to(Executing));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = echo_registry(&calls);
        let err = registry
            .register(spec("echo"), Arc::new(Echo { calls }))
            .unwrap_err();
        assert!(matches!(err, McpError::DuplicateTool(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn valid_call_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = echo_registry(&calls);
        let out = registry
            .dispatch(
                invocation("echo", json!({"text": "hi"})),
                CancellationToken::new(),
                ProgressReporter::disabled(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"echo": "hi"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_never_reaches_a_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = echo_registry(&calls);
        let err = registry
            .dispatch(
                invocation("nope", json!({})),
                CancellationToken::new(),
                ProgressReporter::disabled(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
        assert!(err.message.contains("unknown tool"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_a_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = echo_registry(&calls);
        for args in [
            json!({}),
            json!({"text": 1}),
            json!({"text": "a", "extra": true}),
            json!({"text": "a", "repeat": 9}),
            json!({"text": "a", "repeat": "2"}),
            json!(["text"]),
        ] {
            let err = registry
                .dispatch(
                    invocation("echo", args),
                    CancellationToken::new(),
                    ProgressReporter::disabled(),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schema_errors_name_the_offending_field() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = echo_registry(&calls);
        let err = registry
            .dispatch(
                invocation("echo", json!({"text": "a", "repeat": 0})),
                CancellationToken::new(),
                ProgressReporter::disabled(),
            )
            .await
            .unwrap_err();
        assert!(err.message.starts_with("/repeat"), "{}", err.message);

        let ok = registry
            .dispatch(
                invocation("echo", json!({"text": "a", "repeat": 3})),
                CancellationToken::new(),
                ProgressReporter::disabled(),
            )
            .await
            .unwrap();
        assert_eq!(ok, json!({"echo": "a"}));
    }

    #[test]
    fn uncompilable_input_schema_is_a_config_error() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        let bad = ToolSpec {
            input_schema: json!({"type": "no-such-type"}),
            ..spec("bad")
        };
        let err = registry.register(bad, Arc::new(Panics)).unwrap_err();
        assert!(matches!(err, McpError::Config(msg) if msg.contains("'bad'")));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn panics_become_opaque_execution_errors() {
        let mut registry = ToolRegistry::new(Duration::from_secs(5));
        registry.register(open_spec("boom"), Arc::new(Panics)).unwrap();
        let err = registry
            .dispatch(
                invocation("boom", json!({})),
                CancellationToken::new(),
                ProgressReporter::disabled(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ToolExecutionError);
        assert!(err.reference.is_some());
        assert!(!err.message.contains("secret internal detail"));
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new(Duration::from_millis(100));
        registry
            .register(open_spec("slow"), Arc::new(Sleeps { saw_cancel }))
            .unwrap();

        let started = Instant::now();
        let err = registry
            .dispatch(
                invocation("slow", json!({})),
                CancellationToken::new(),
                ProgressReporter::disabled(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_ends_the_call() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new(Duration::from_secs(30));
        registry
            .register(
                open_spec("slow"),
                Arc::new(Sleeps {
                    saw_cancel: Arc::clone(&saw_cancel),
                }),
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = registry
            .dispatch(invocation("slow", json!({})), cancel, ProgressReporter::disabled())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn list_tools_keeps_registration_order() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(open_spec("b_tool"), Arc::new(Panics)).unwrap();
        registry.register(open_spec("a_tool"), Arc::new(Panics)).unwrap();
        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b_tool", "a_tool"]);
        assert!(registry.list_tools()[0].output_schema.is_some());
    }
}
