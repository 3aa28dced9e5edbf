//! Streamable HTTP transport tests, driven through the axum router in-process.
#![cfg(feature = "http")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::*;
use daa_mcp::transport::http::SESSION_HEADER;
use daa_mcp::transport::{HttpOptions, HttpTransport};

const TOKEN: &str = "s3cret";

fn transport_with(h: Harness, options: HttpOptions) -> (Harness, HttpTransport) {
    let handler = Arc::new(h.handler(Duration::from_secs(10)));
    let options = HttpOptions {
        portal: Some(Arc::clone(h.services.sessions())),
        ..options
    };
    let transport = HttpTransport::new(handler, options);
    (h, transport)
}

async fn app(options: HttpOptions) -> (Harness, Router) {
    let (h, transport) = transport_with(harness().await, options);
    (h, transport.router())
}

fn post() -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json")
}

fn with_body(builder: axum::http::request::Builder, body: &Value) -> Request<Body> {
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// `data:` payloads of an SSE body, in order.
fn sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

async fn open_session(router: &Router) -> String {
    let init = init_request("2025-06-18");
    let response = router
        .clone()
        .oneshot(with_body(post(), &init))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.headers()[SESSION_HEADER]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_needs_no_token() {
    let (_h, router) = app(HttpOptions {
        token: Some(TOKEN.to_string()),
        ..HttpOptions::default()
    })
    .await;

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["tools"], 4);
    assert_eq!(health["in_flight"], 0);
    assert_eq!(health["portal"]["logins"], 0);
}

#[tokio::test]
async fn bearer_token_is_enforced() {
    let (_h, router) = app(HttpOptions {
        token: Some(TOKEN.to_string()),
        ..HttpOptions::default()
    })
    .await;
    let ping = mcp_request(1, "ping", json!({}));

    let missing = router
        .clone()
        .oneshot(with_body(post(), &ping))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(missing).await["error"]["code"], -32900);

    let wrong = router
        .clone()
        .oneshot(with_body(
            post().header(header::AUTHORIZATION, "Bearer nope"),
            &ping,
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = router
        .oneshot(with_body(
            post().header(header::AUTHORIZATION, format!("Bearer {TOKEN}")),
            &ping,
        ))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(body_json(ok).await["result"], json!({}));
}

#[tokio::test]
async fn initialize_issues_session_and_unknown_session_is_404() {
    let (_h, router) = app(HttpOptions::default()).await;

    let session = open_session(&router).await;
    assert!(!session.is_empty());

    let list = mcp_request(2, "tools/list", json!({}));
    let known = router
        .clone()
        .oneshot(with_body(post().header(SESSION_HEADER, &session), &list))
        .await
        .unwrap();
    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(body_json(known).await["result"]["tools"].as_array().unwrap().len(), 4);

    let unknown = router
        .oneshot(with_body(post().header(SESSION_HEADER, "no-such-session"), &list))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(unknown).await["error"]["code"], -32901);
}

#[tokio::test]
async fn notifications_are_accepted_without_body() {
    let (_h, router) = app(HttpOptions::default()).await;
    let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});

    let response = router.oneshot(with_body(post(), &note)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let (_h, router) = app(HttpOptions::default()).await;

    let response = router
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{oops"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn get_is_not_offered() {
    let (_h, router) = app(HttpOptions::default()).await;

    let response = router
        .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "POST, DELETE");
}

#[tokio::test]
async fn delete_ends_session() {
    let (_h, router) = app(HttpOptions::default()).await;
    let delete = |session: Option<&str>| {
        let mut builder = Request::delete("/mcp");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    };

    let missing = router.clone().oneshot(delete(None)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let session = open_session(&router).await;
    let first = router.clone().oneshot(delete(Some(&session))).await.unwrap();
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let second = router.clone().oneshot(delete(Some(&session))).await.unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);

    let ping = mcp_request(3, "ping", json!({}));
    let after = router
        .oneshot(with_body(post().header(SESSION_HEADER, &session), &ping))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn caller_comes_from_headers_or_default_user() {
    let (h, router) = app(HttpOptions::default()).await;
    let call = call_request(4, "get_schedule", json!({}));

    let anonymous = router
        .clone()
        .oneshot(with_body(post(), &call))
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::OK);
    assert_eq!(error_kind(&body_json(anonymous).await), "AuthenticationFailed");
    assert_eq!(h.login_count(), 0);

    let named = router
        .oneshot(with_body(post().header("X-User-ID", USER), &call))
        .await
        .unwrap();
    let body = body_json(named).await;
    assert_eq!(structured(&body)["count"], 4);
    assert_eq!(h.login_count(), 1);

    let (h, router) = app(HttpOptions {
        default_user: Some(USER.to_string()),
        ..HttpOptions::default()
    })
    .await;
    let defaulted = router.oneshot(with_body(post(), &call)).await.unwrap();
    assert_eq!(structured(&body_json(defaulted).await)["count"], 4);
    assert_eq!(h.login_count(), 1);

    // A credential reference overrides the user id for the store lookup.
    let (h, router) = app(HttpOptions::default()).await;
    let redirected = router
        .oneshot(with_body(
            post()
                .header("X-User-ID", "someone-else")
                .header("X-Credential-Ref", USER),
            &call,
        ))
        .await
        .unwrap();
    assert_eq!(structured(&body_json(redirected).await)["count"], 4);
    assert_eq!(h.login_count(), 1);
}

#[tokio::test]
async fn tool_call_streams_progress_then_result() {
    let (_h, router) = app(HttpOptions {
        default_user: Some(USER.to_string()),
        ..HttpOptions::default()
    })
    .await;
    let call = mcp_request(
        5,
        "tools/call",
        json!({
            "name": "get_schedule",
            "arguments": {"term": "2023-2"},
            "_meta": {"progressToken": 99}
        }),
    );

    let response = router
        .oneshot(with_body(
            post().header(header::ACCEPT, "application/json, text/event-stream"),
            &call,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let events = sse_events(&body_text(response).await);
    assert!(events.len() >= 3, "{events:?}");
    let (reply, progress) = events.split_last().unwrap();
    assert!(progress.iter().all(|e| e["method"] == "notifications/progress"
        && e["params"]["progressToken"] == 99));
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["result"]["structuredContent"]["count"], 4);
}

#[tokio::test]
async fn cors_exposes_session_header() {
    let (_h, router) = app(HttpOptions::default()).await;
    let init = init_request("2025-06-18");

    let response = router
        .oneshot(with_body(
            post().header(header::ORIGIN, "http://localhost:5173"),
            &init,
        ))
        .await
        .unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let exposed = response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
        .to_str()
        .unwrap();
    assert!(exposed.contains(SESSION_HEADER));
}

#[tokio::test]
async fn health_counts_live_portal_sessions() {
    let (_h, router) = app(HttpOptions {
        default_user: Some(USER.to_string()),
        ..HttpOptions::default()
    })
    .await;
    let health = || async {
        let response = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        body_json(response).await
    };

    assert_eq!(health().await["portal"]["sessions"], 0);

    let call = call_request(6, "get_schedule", json!({}));
    let response = router.clone().oneshot(with_body(post(), &call)).await.unwrap();
    assert_eq!(structured(&body_json(response).await)["count"], 4);

    let after = health().await;
    assert_eq!(after["portal"]["sessions"], 1);
    assert_eq!(after["portal"]["logins"], 1);
}

#[tokio::test]
async fn sessionless_callers_do_not_share_request_ids() {
    let h = harness_with(login_ok().set_delay(Duration::from_millis(300))).await;
    let (_h, transport) = transport_with(
        h,
        HttpOptions {
            default_user: Some(USER.to_string()),
            ..HttpOptions::default()
        },
    );
    let router = transport.router();

    let spawn_call = || {
        let router = router.clone();
        tokio::spawn(async move {
            let call = call_request(1, "get_schedule", json!({}));
            let response = router.oneshot(with_body(post(), &call)).await.unwrap();
            body_json(response).await
        })
    };
    let first = spawn_call();
    let second = spawn_call();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let health = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(health).await["in_flight"], 2);

    // Without a session this cannot name either caller's request.
    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": 1 }
    });
    let response = router.clone().oneshot(with_body(post(), &cancel)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    for reply in [first.await.unwrap(), second.await.unwrap()] {
        assert_eq!(reply["id"], 1);
        assert_eq!(structured(&reply)["count"], 4);
    }
}

#[tokio::test]
async fn idle_sessions_are_evicted_and_active_ones_kept() {
    let (_h, transport) = transport_with(
        harness().await,
        HttpOptions {
            session_idle_ttl: Duration::from_secs(5),
            ..HttpOptions::default()
        },
    );
    let router = transport.router();
    let active = open_session(&router).await;
    let idle = open_session(&router).await;
    assert_eq!(transport.session_count(), 2);

    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(3)).await;
    let ping = mcp_request(7, "ping", json!({}));
    let refreshed = router
        .clone()
        .oneshot(with_body(post().header(SESSION_HEADER, &active), &ping))
        .await
        .unwrap();
    assert_eq!(refreshed.status(), StatusCode::OK);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(transport.evict_idle_sessions(), 1);
    assert_eq!(transport.session_count(), 1);

    let gone = router
        .clone()
        .oneshot(with_body(post().header(SESSION_HEADER, &idle), &ping))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    let kept = router
        .oneshot(with_body(post().header(SESSION_HEADER, &active), &ping))
        .await
        .unwrap();
    assert_eq!(kept.status(), StatusCode::OK);
}

#[tokio::test]
async fn session_sweeper_runs_until_shutdown() {
    let (_h, transport) = transport_with(
        harness().await,
        HttpOptions {
            session_idle_ttl: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            ..HttpOptions::default()
        },
    );
    open_session(&transport.router()).await;

    tokio::time::pause();
    let shutdown = CancellationToken::new();
    let sweeper = transport.spawn_sweeper(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.session_count(), 1);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(transport.session_count(), 0);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
