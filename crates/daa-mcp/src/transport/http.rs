//! Streamable HTTP transport: `POST /mcp` with JSON or SSE replies, session
//! ids, bearer auth, caller identity headers, and `/health`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json as AxumJson, Response,
    },
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use daa_core::SessionManager;

use crate::protocol::{ProtocolHandler, RequestContext};
use crate::tools::CallerIdentity;
use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::framing;

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const USER_HEADER: &str = "x-user-id";
pub const CREDENTIAL_HEADER: &str = "x-credential-ref";

/// Optional settings for the HTTP transport.
pub struct HttpOptions {
    /// Bearer token required on `/mcp`, if any.
    pub token: Option<String>,
    /// Identity used when a request carries no `X-User-ID`.
    pub default_user: Option<String>,
    /// Portal session manager, reported on `/health`.
    pub portal: Option<Arc<SessionManager>>,
    /// MCP sessions without a request for this long are dropped.
    pub session_idle_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            token: None,
            default_user: None,
            portal: None,
            session_idle_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared server state passed to all handlers via axum State.
pub struct HttpState {
    handler: Arc<ProtocolHandler>,
    options: HttpOptions,
    /// Session id to the time of its last request.
    sessions: DashMap<String, Instant>,
}

impl HttpState {
    /// Drop sessions idle past `session_idle_ttl` and cancel their calls.
    fn evict_idle_sessions(&self) -> usize {
        let idle_ttl = self.options.session_idle_ttl;
        let mut expired = Vec::new();
        self.sessions.retain(|id, last_seen| {
            let keep = last_seen.elapsed() < idle_ttl;
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        for id in &expired {
            let cancelled = self.handler.cancel_scope(id);
            tracing::info!(session = %id, cancelled, "MCP session expired");
        }
        expired.len()
    }
}

/// Streamable HTTP transport for web-based MCP clients.
pub struct HttpTransport {
    state: Arc<HttpState>,
}

impl HttpTransport {
    pub fn new(handler: Arc<ProtocolHandler>, options: HttpOptions) -> Self {
        Self {
            state: Arc::new(HttpState {
                handler,
                options,
                sessions: DashMap::new(),
            }),
        }
    }

    /// Number of open MCP sessions.
    pub fn session_count(&self) -> usize {
        self.state.sessions.len()
    }

    pub fn evict_idle_sessions(&self) -> usize {
        self.state.evict_idle_sessions()
    }

    /// Periodically evict idle MCP sessions until `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let period = state.options.sweep_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        state.evict_idle_sessions();
                    }
                }
            }
        })
    }

    pub fn router(&self) -> Router {
        let state = Arc::clone(&self.state);
        Router::new()
            .route(
                "/mcp",
                post(handle_post).delete(handle_delete).get(handle_get),
            )
            .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
            .route("/health", get(handle_health))
            .layer(cors_layer())
            .with_state(state)
    }

    /// Serve on `addr` until `shutdown` fires.
    pub async fn run(&self, addr: &str, shutdown: CancellationToken) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(McpError::Io)?;

        tracing::info!("HTTP transport listening on {addr}");
        let sweeper = self.spawn_sweeper(shutdown.clone());

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| McpError::Transport(e.to_string()));

        sweeper.abort();
        served
    }
}

/// Browser clients must be able to read the session id they are handed.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
}

fn rpc_error(status: StatusCode, err: &McpError) -> Response {
    (status, AxumJson(framing::error_response(err))).into_response()
}

/// Auth middleware: checks Bearer token if configured.
/// /health is handled by a separate route that bypasses this layer.
async fn auth_layer(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.options.token {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);

        if !authorized {
            return rpc_error(StatusCode::UNAUTHORIZED, &McpError::Unauthorized);
        }
    }

    next.run(request).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn caller_from_headers(headers: &HeaderMap, default_user: Option<&str>) -> Option<CallerIdentity> {
    match header_str(headers, USER_HEADER) {
        Some(user) => Some(CallerIdentity::new(
            user,
            header_str(headers, CREDENTIAL_HEADER).map(str::to_string),
        )),
        None => default_user.map(|user| CallerIdentity::new(user, None)),
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

/// Handle one JSON-RPC message.
///
/// Notifications get `202`. `tools/call` streams over SSE when the client
/// accepts it; everything else is answered with a single JSON body.
async fn handle_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let msg = match std::str::from_utf8(&body)
        .map_err(|e| McpError::ParseError(e.to_string()))
        .and_then(framing::parse_message)
    {
        Ok(msg) => msg,
        Err(e) => return rpc_error(StatusCode::BAD_REQUEST, &e),
    };

    let known_session = match header_str(&headers, SESSION_HEADER) {
        Some(id) => match state.sessions.get_mut(id) {
            Some(mut last_seen) => {
                *last_seen = Instant::now();
                Some(id.to_string())
            }
            None => {
                return rpc_error(
                    StatusCode::NOT_FOUND,
                    &McpError::SessionNotFound(id.to_string()),
                );
            }
        },
        None => None,
    };

    let new_session = (msg.is_request() && msg.method() == Some("initialize"))
        .then(|| uuid::Uuid::new_v4().to_string());
    if let Some(id) = &new_session {
        state.sessions.insert(id.clone(), Instant::now());
        tracing::info!(session = %id, "MCP session created");
    }

    // Without a session there is nothing to correlate a later cancel with,
    // so each such request gets a scope of its own.
    let scope = new_session
        .clone()
        .or(known_session)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let caller = caller_from_headers(&headers, state.options.default_user.as_deref());
    let ctx = RequestContext::new(scope, caller);

    if !msg.is_request() {
        state.handler.handle_message(msg, ctx).await;
        return StatusCode::ACCEPTED.into_response();
    }

    let cancel = CancellationToken::new();
    let ctx = ctx.with_cancel(cancel.clone());
    let handler = Arc::clone(&state.handler);

    let mut response = if msg.method() == Some("tools/call") && accepts_event_stream(&headers) {
        event_stream(handler, msg, ctx, cancel)
    } else {
        // Dropping this future (client disconnect) fires the guard.
        let guard = cancel.drop_guard();
        let reply = handler.handle_message(msg, ctx).await;
        guard.disarm();
        match reply {
            Some(value) => AxumJson(value).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        }
    };

    if let Some(id) = new_session {
        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

enum StreamStep {
    Progress(Value),
    Done(Option<Value>),
}

fn message_event(value: &Value) -> Event {
    Event::default().event("message").data(value.to_string())
}

/// SSE reply: progress notifications as they happen, then the response.
fn event_stream(
    handler: Arc<ProtocolHandler>,
    msg: JsonRpcMessage,
    ctx: RequestContext,
    cancel: CancellationToken,
) -> Response {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let ctx = ctx.with_notifications(tx);

    let stream = async_stream::stream! {
        // The stream is dropped when the client disconnects.
        let guard = cancel.drop_guard();
        let work = handler.handle_message(msg, ctx);
        tokio::pin!(work);

        let reply = loop {
            let step = tokio::select! {
                reply = &mut work => StreamStep::Done(reply),
                Some(note) = rx.recv() => StreamStep::Progress(note),
            };
            match step {
                StreamStep::Progress(note) => yield Ok::<Event, Infallible>(message_event(&note)),
                StreamStep::Done(reply) => break reply,
            }
        };

        while let Ok(note) = rx.try_recv() {
            yield Ok(message_event(&note));
        }
        if let Some(reply) = reply {
            yield Ok(message_event(&reply));
        }
        guard.disarm();
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// End a session and cancel its in-flight calls.
async fn handle_delete(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(id) = header_str(&headers, SESSION_HEADER) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            &McpError::InvalidRequest("Missing Mcp-Session-Id header".to_string()),
        );
    };
    if state.sessions.remove(id).is_none() {
        return rpc_error(StatusCode::NOT_FOUND, &McpError::SessionNotFound(id.to_string()));
    }
    let cancelled = state.handler.cancel_scope(id);
    tracing::info!(session = %id, cancelled, "MCP session closed");
    StatusCode::NO_CONTENT.into_response()
}

/// No server-initiated stream is offered.
async fn handle_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST, DELETE")],
    )
        .into_response()
}

/// Health check endpoint: no auth required.
async fn handle_health(State(state): State<Arc<HttpState>>) -> AxumJson<Value> {
    let mut health = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len(),
        "in_flight": state.handler.in_flight(),
        "tools": state.handler.registry().len(),
    });

    if let Some(portal) = &state.options.portal {
        health["portal"] = json!({
            "sessions": portal.live_session_count(),
            "logins": portal.login_count(),
        });
    }

    AxumJson(health)
}
