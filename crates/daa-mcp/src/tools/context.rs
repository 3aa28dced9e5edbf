//! Per-invocation context handed to tool handlers.

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::types::{JsonRpcNotification, ProgressParams, ProgressToken};

/// Who is calling: the end user and which stored credentials to use for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub credential_ref: String,
}

impl CallerIdentity {
    /// Identity whose credential reference defaults to the user id.
    pub fn new(user_id: impl Into<String>, credential_ref: Option<String>) -> Self {
        let user_id = user_id.into();
        let credential_ref = credential_ref.unwrap_or_else(|| user_id.clone());
        Self {
            user_id,
            credential_ref,
        }
    }
}

/// Sends `notifications/progress` for one call. Silent unless the client
/// supplied a progress token and the transport can carry notifications.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sink: Option<(ProgressToken, UnboundedSender<Value>)>,
}

impl ProgressReporter {
    pub fn new(token: ProgressToken, sink: UnboundedSender<Value>) -> Self {
        Self {
            sink: Some((token, sink)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn report(&self, progress: f64, total: Option<f64>, message: &str) {
        let Some((token, sink)) = &self.sink else {
            return;
        };
        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message: Some(message.to_string()),
        };
        let notification =
            JsonRpcNotification::new("notifications/progress", serde_json::to_value(params).ok());
        if let Ok(value) = serde_json::to_value(notification) {
            // A closed sink means the client went away; cancellation handles that.
            let _ = sink.send(value);
        }
    }
}

/// Everything a handler may use besides its validated arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub caller: Option<CallerIdentity>,
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}
