//! Shared fixtures: a mock DAA portal, a small in-memory corpus, and helpers
//! for driving the protocol handler.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use daa_core::{
    Credentials, DaaScraper, InMemoryIndex, PortalConfig, RetrievalConfig, RetrievalEngine,
    SessionManager, StaticCredentialStore,
};
use daa_mcp::protocol::{ProtocolHandler, RequestContext};
use daa_mcp::tools::{CallerIdentity, ToolServices};
use daa_mcp::types::JsonRpcMessage;

pub const SCHEDULE_HTML: &str =
    include_str!("../../../daa-core/tests/fixtures/schedule_table.html");
pub const GRADES_JSON: &str = include_str!("../../../daa-core/tests/fixtures/grades_api.json");

pub const USER: &str = "sv001";

pub struct Harness {
    pub portal: MockServer,
    pub services: ToolServices,
}

impl Harness {
    pub fn handler(&self, timeout: Duration) -> ProtocolHandler {
        ProtocolHandler::new(self.services.registry(timeout).unwrap())
    }

    pub fn login_count(&self) -> u64 {
        self.services.sessions().login_count()
    }

    pub async fn portal_requests(&self) -> usize {
        self.portal
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}

pub fn login_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).insert_header("set-cookie", "DAASESSID=s3ss10n; Path=/")
}

/// Portal whose login answers with `login` and whose data pages serve fixtures.
pub async fn harness_with(login: ResponseTemplate) -> Harness {
    let portal = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(login)
        .mount(&portal)
        .await;
    Mock::given(method("GET"))
        .and(path("/student/grades"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(GRADES_JSON, "application/json"))
        .mount(&portal)
        .await;
    Mock::given(method("GET"))
        .and(path("/student/schedule"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(SCHEDULE_HTML, "text/html; charset=utf-8"),
        )
        .mount(&portal)
        .await;

    let sessions = SessionManager::new(PortalConfig {
        base_url: portal.uri(),
        retry_attempts: 3,
        retry_base_ms: 10,
        timeout_ms: 10_000,
        ..PortalConfig::default()
    })
    .unwrap();

    let mut credentials = HashMap::new();
    credentials.insert(
        USER.to_string(),
        Credentials {
            username: "20201234".to_string(),
            password: "secret".to_string(),
        },
    );

    let services = ToolServices {
        scraper: DaaScraper::new(Arc::new(sessions)),
        credentials: Arc::new(StaticCredentialStore::new(credentials)),
        retrieval: Arc::new(RetrievalEngine::new(
            Arc::new(corpus()),
            RetrievalConfig::default(),
        )),
    };
    Harness { portal, services }
}

pub async fn harness() -> Harness {
    harness_with(login_ok()).await
}

pub fn corpus() -> InMemoryIndex {
    let mut index = InMemoryIndex::new();
    index.insert("regulation", "qc-2021", 0, "Students must register for courses before the registration deadline", "Regulation 2021, Article 8");
    index.insert("regulation", "qc-2021", 1, "A student may register at most 25 credits per regular term", "Regulation 2021, Article 9");
    index.insert("regulation", "qc-2021", 2, "Students on academic probation may register at most 14 credits", "Regulation 2021, Article 16");
    index.insert("regulation", "hp-2023", 0, "Tuition is charged per registered credit each term", "Tuition Decision 2023, Article 2");
    index.insert("curriculum/cs", "ctdt-cs", 0, "Computer science students complete 132 credits including data structures", "CS Curriculum 2023, p.4");
    index.insert("curriculum/cs", "ctdt-cs", 1, "Machine learning is an elective worth 3 credits", "CS Curriculum 2023, p.9");
    index.insert("curriculum/ee", "ctdt-ee", 0, "Electrical engineering students complete 135 credits including circuits", "EE Curriculum 2023, p.3");
    index
}

pub fn caller() -> CallerIdentity {
    CallerIdentity::new(USER, None)
}

pub fn ctx(caller: Option<CallerIdentity>) -> RequestContext {
    RequestContext::new("test", caller)
}

/// Build an MCP JSON-RPC request.
pub fn mcp_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub fn call_request(id: i64, tool: &str, arguments: Value) -> Value {
    mcp_request(id, "tools/call", json!({ "name": tool, "arguments": arguments }))
}

/// Build an initialize request.
pub fn init_request(version: &str) -> Value {
    mcp_request(
        0,
        "initialize",
        json!({
            "protocolVersion": version,
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
}

/// Send a JSON-RPC message through the handler and return the response.
pub async fn send(handler: &ProtocolHandler, msg: Value, ctx: RequestContext) -> Option<Value> {
    let parsed: JsonRpcMessage = serde_json::from_value(msg).unwrap();
    handler.handle_message(parsed, ctx).await
}

/// Send as the default test user and unwrap the response.
pub async fn send_unwrap(handler: &ProtocolHandler, msg: Value) -> Value {
    send(handler, msg, ctx(Some(caller())))
        .await
        .expect("expected response")
}

/// `result.structuredContent` of a successful tool call.
pub fn structured(response: &Value) -> &Value {
    assert!(
        response["result"]["isError"].is_null(),
        "unexpected tool error: {response}"
    );
    &response["result"]["structuredContent"]
}

/// `kind` of an error tool result.
pub fn error_kind(response: &Value) -> &str {
    assert_eq!(response["result"]["isError"], true, "expected tool error: {response}");
    response["result"]["structuredContent"]["kind"]
        .as_str()
        .unwrap_or_default()
}
