//! MCP server validation tests.
//!
//! Tests JSON-RPC 2.0 protocol compliance, tool execution, consent gating and
//! error handling against an in-process server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tokio::time::timeout;

use toolgate_mcp::arguments::ArgumentNormalizer;
use toolgate_mcp::authorization::{
    AuthorizationGate, AuthorizationProvider, Grant, GrantRequest, GrantStatus,
};
use toolgate_mcp::{CallerContext, McpServer, Result, Tool, ToolRegistry};

// JSON-RPC 2.0 types
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

fn request(id: u64, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id,
        method: method.into(),
        params,
    }
}

/// Backend double recording the arguments it receives.
struct RecordingTool {
    name: &'static str,
    schema: Option<Value>,
    provider: Option<&'static str>,
    reply: Value,
    calls: Mutex<Vec<Map<String, Value>>>,
}

impl RecordingTool {
    fn new(name: &'static str, reply: Value) -> Self {
        Self {
            name,
            schema: None,
            provider: None,
            reply,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Map<String, Value>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "recording test tool"
    }

    fn input_schema(&self) -> Option<Value> {
        self.schema.clone()
    }

    fn auth_provider(&self) -> Option<&str> {
        self.provider
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value> {
        self.calls.lock().unwrap().push(arguments);
        Ok(self.reply.clone())
    }
}

/// Tool that blocks until released.
struct BlockingTool {
    release: Arc<Notify>,
}

#[async_trait::async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        "slow_tool"
    }

    fn description(&self) -> &str {
        "waits for a signal"
    }

    async fn invoke(&self, _arguments: Map<String, Value>) -> Result<Value> {
        self.release.notified().await;
        Ok(json!("finally"))
    }
}

/// Provider whose grants stay pending forever.
struct NeverConsents;

#[async_trait::async_trait]
impl AuthorizationProvider for NeverConsents {
    async fn authorize(&self, request: &GrantRequest) -> Result<Grant> {
        Ok(Grant {
            id: format!("gr_{}_{}", request.tool_name, request.user_identity),
            tool_name: request.tool_name.clone(),
            provider: request.provider.clone(),
            user_identity: request.user_identity.clone(),
            status: GrantStatus::Pending,
            authorization_url: Some(format!(
                "https://consent.example.com/{}?user={}",
                request.provider, request.user_identity
            )),
        })
    }
}

/// MCP test client driving the server in-process.
struct McpTestClient {
    server: McpServer,
    caller: CallerContext,
}

impl McpTestClient {
    fn new(server: McpServer) -> Self {
        Self {
            server,
            caller: CallerContext::new("alice"),
        }
    }

    async fn send_raw(&self, body: &str) -> (u16, JsonRpcResponse) {
        let reply = timeout(
            Duration::from_secs(5),
            self.server.handle_message(body, &self.caller),
        )
        .await
        .expect("server did not answer in time");
        let json = serde_json::to_value(&reply.response).unwrap();
        (reply.status, serde_json::from_value(json).unwrap())
    }

    async fn send_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let body = serde_json::to_string(&request).unwrap();
        self.send_raw(&body).await.1
    }
}

fn scrape_tool() -> RecordingTool {
    let mut tool = RecordingTool::new("Web_ScrapeUrl", json!({"markdown": "hello"}));
    tool.schema = Some(json!({
        "properties": {"url": {"type": "string"}},
        "required": ["url"]
    }));
    tool
}

fn server_with(tools: Vec<Arc<dyn Tool>>, gate: AuthorizationGate) -> McpServer {
    let mut registry = ToolRegistry::new();
    registry.register(Some("web_"), tools);
    McpServer::new(Arc::new(registry), gate).with_server_name("toolgate-test")
}

// ============================================================================
// Protocol Compliance Tests
// ============================================================================

#[tokio::test]
async fn test_initialize_handshake() {
    let client = McpTestClient::new(server_with(vec![], AuthorizationGate::open()));

    let response = client
        .send_request(request(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.1.0"}
            })),
        ))
        .await;

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, Some(1));
    assert!(response.error.is_none(), "Should not have error");

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2025-03-26");
    assert_eq!(result["serverInfo"]["name"], "toolgate-test");
    assert_eq!(result["serverInfo"]["version"], env!("CARGO_PKG_VERSION"));

    let (status, ack) = client
        .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    assert_eq!(status, 202);
    assert_eq!(ack.result, Some(json!({})));
}

#[tokio::test]
async fn test_get_probe() {
    let server = server_with(vec![], AuthorizationGate::open());
    let reply = server.probe();
    let body = serde_json::to_value(&reply.response).unwrap();

    assert_eq!(reply.status, 200);
    assert_eq!(body["id"], 0);
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(body["result"]["serverInfo"]["name"], "toolgate-test");
}

#[tokio::test]
async fn test_list_tools() {
    let client = McpTestClient::new(server_with(
        vec![
            Arc::new(scrape_tool()),
            Arc::new(RecordingTool::new("Gmail_SendEmail", Value::Null)),
            // Same normalized name as the first one: replaces it.
            Arc::new(scrape_tool()),
        ],
        AuthorizationGate::open(),
    ));

    let response = client.send_request(request(2, "tools/list", None)).await;
    assert!(response.error.is_none(), "Should not have error");

    let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
    let tool_names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(tool_names, ["scrapeurl", "gmail_sendemail"]);

    assert_eq!(
        tools[0]["inputSchema"],
        json!({"properties": {"url": {"type": "string"}}, "required": ["url"]})
    );
    assert_eq!(
        tools[1]["inputSchema"],
        json!({"type": "object", "properties": {}, "required": []})
    );
}

#[tokio::test]
async fn test_malformed_envelopes() {
    let client = McpTestClient::new(server_with(vec![], AuthorizationGate::open()));

    for body in [
        "this is not json",
        r#"{"jsonrpc":"2.0","id":12}"#,
        r#"{"jsonrpc":"2.0","id":12,"method":7}"#,
        "42",
    ] {
        let (status, response) = client.send_raw(body).await;
        assert_eq!(status, 400, "{body}");
        assert_eq!(response.id, Some(0), "{body}");
        assert_eq!(response.error.unwrap().code, -32600, "{body}");
    }
}

#[tokio::test]
async fn test_unknown_method_error() {
    let client = McpTestClient::new(server_with(vec![], AuthorizationGate::open()));

    for (id, method) in [(99, "nonexistent/method"), (100, "ping"), (101, "resources/list")] {
        let response = client.send_request(request(id, method, None)).await;
        assert_eq!(response.id, Some(id));
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert!(error.message.contains(method));
    }
}

// ============================================================================
// Tool Call Tests
// ============================================================================

#[tokio::test]
async fn test_tool_call_fills_scrape_defaults() {
    let tool = Arc::new(scrape_tool());
    let client = McpTestClient::new(server_with(vec![tool.clone()], AuthorizationGate::open()));

    let response = client
        .send_request(request(
            2,
            "tools/call",
            Some(json!({
                "name": "scrapeurl",
                "arguments": {"url": "https://example.com", "formats": null}
            })),
        ))
        .await;

    assert!(response.error.is_none(), "{:?}", response.error);
    assert_eq!(
        response.result.unwrap(),
        json!({"content": [{"type": "text", "text": "hello"}]})
    );

    let calls = tool.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        Value::Object(calls[0].clone()),
        json!({"url": "https://example.com", "formats": ["markdown"], "timeout": 30000})
    );
}

#[tokio::test]
async fn test_fully_specified_arguments_pass_unchanged() {
    let mut tool = RecordingTool::new("Web_Search", json!("ok"));
    tool.schema = Some(json!({
        "properties": {
            "query": {"type": "string"},
            "limit": {"type": "integer"},
            "safe": {"type": "boolean"},
            "sites": {"type": "array"}
        }
    }));
    let tool = Arc::new(tool);
    let client = McpTestClient::new(server_with(vec![tool.clone()], AuthorizationGate::open()));

    let arguments = json!({"query": "rust", "limit": 5, "safe": true, "sites": ["docs.rs"]});
    let response = client
        .send_request(request(
            3,
            "tools/call",
            Some(json!({"name": "search", "arguments": arguments})),
        ))
        .await;

    assert!(response.error.is_none());
    assert_eq!(Value::Object(tool.calls()[0].clone()), arguments);
}

#[tokio::test]
async fn test_email_recipients_are_repaired() {
    let mut tool = RecordingTool::new("Gmail_SendEmail", json!({"id": "msg-1"}));
    tool.schema = Some(json!({
        "properties": {
            "to_recipients": {"type": "array"},
            "cc_recipients": {"type": "array"},
            "body": {"type": "string"}
        }
    }));
    let tool = Arc::new(tool);
    let client = McpTestClient::new(server_with(vec![tool.clone()], AuthorizationGate::open()));

    let response = client
        .send_request(request(
            4,
            "tools/call",
            Some(json!({
                "name": "Gmail_SendEmail",
                "arguments": {
                    "to_recipients": "bob@example.com",
                    "cc_recipients": "[\"carol@example.com\", \"dan@example.com\"]",
                    "body": "hi"
                }
            })),
        ))
        .await;

    assert!(response.error.is_none());
    assert_eq!(
        response.result.unwrap()["content"][0]["text"],
        r#"{"id":"msg-1"}"#
    );
    let call = &tool.calls()[0];
    assert_eq!(call["to_recipients"], json!(["bob@example.com"]));
    assert_eq!(
        call["cc_recipients"],
        json!(["carol@example.com", "dan@example.com"])
    );
}

#[tokio::test]
async fn test_unparsable_recipients_name_the_field() {
    let tool = Arc::new(RecordingTool::new("Gmail_SendEmail", Value::Null));
    let client = McpTestClient::new(server_with(vec![tool.clone()], AuthorizationGate::open()));

    let response = client
        .send_request(request(
            5,
            "tools/call",
            Some(json!({
                "name": "gmail_sendemail",
                "arguments": {"bcc_recipients": "[not json]"}
            })),
        ))
        .await;

    let error = response.error.unwrap();
    assert!(error.message.contains("bcc_recipients"), "{}", error.message);
    assert!(tool.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_tool_error() {
    let client = McpTestClient::new(server_with(vec![], AuthorizationGate::open()));

    let (status, response) = client
        .send_raw(
            &serde_json::to_string(&request(
                100,
                "tools/call",
                Some(json!({"name": "nonexistent_tool", "arguments": {}})),
            ))
            .unwrap(),
        )
        .await;

    assert_eq!(status, 400);
    assert_eq!(response.id, Some(100));
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("nonexistent_tool"));
}

// ============================================================================
// Consent Gate Tests
// ============================================================================

#[tokio::test]
async fn test_gated_tool_requires_interaction() {
    let mut tool = scrape_tool();
    tool.provider = Some("google");
    let tool = Arc::new(tool);
    let client = McpTestClient::new(server_with(
        vec![tool.clone()],
        AuthorizationGate::new(Arc::new(NeverConsents)),
    ));

    let call = || {
        request(
            6,
            "tools/call",
            Some(json!({
                "name": "scrapeurl",
                "arguments": {"url": "https://example.com", "formats": null}
            })),
        )
    };

    let first = client.send_request(call()).await.error.unwrap();
    let second = client.send_request(call()).await.error.unwrap();

    for error in [&first, &second] {
        assert_eq!(error.code, -32003);
        assert_eq!(error.message, "interaction_required");
        let data = error.data.as_ref().unwrap();
        assert_eq!(data["type"], "url");
        assert_eq!(data["url"], "https://consent.example.com/google?user=alice");
        assert!(data["message"]["text"].as_str().unwrap().contains("Authorization required"));
    }
    assert_eq!(first.data, second.data);
    assert!(tool.calls().is_empty(), "backend must not run while consent is pending");
}

#[tokio::test]
async fn test_ungated_tools_ignore_provider() {
    let tool = Arc::new(scrape_tool());
    let client = McpTestClient::new(server_with(
        vec![tool.clone()],
        AuthorizationGate::new(Arc::new(NeverConsents)),
    ));

    let response = client
        .send_request(request(
            7,
            "tools/call",
            Some(json!({"name": "scrapeurl", "arguments": {"url": "https://example.com"}})),
        ))
        .await;
    assert!(response.error.is_none());
    assert_eq!(tool.calls().len(), 1);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_slow_tool_does_not_block_other_requests() {
    let release = Arc::new(Notify::new());
    let fast = Arc::new(scrape_tool());
    let server = server_with(
        vec![
            Arc::new(BlockingTool {
                release: release.clone(),
            }),
            fast.clone(),
        ],
        AuthorizationGate::open(),
    )
    .with_normalizer(ArgumentNormalizer::standard());

    let slow_server = server.clone();
    let slow = tokio::spawn(async move {
        slow_server
            .handle_message(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"slow_tool"}}"#,
                &CallerContext::default(),
            )
            .await
    });

    let client = McpTestClient::new(server);
    let response = client
        .send_request(request(
            2,
            "tools/call",
            Some(json!({"name": "scrapeurl", "arguments": {"url": "https://example.com"}})),
        ))
        .await;
    assert!(response.error.is_none());
    assert!(!slow.is_finished());

    release.notify_one();
    let reply = timeout(Duration::from_secs(5), slow).await.unwrap().unwrap();
    let body = serde_json::to_value(&reply.response).unwrap();
    assert_eq!(body["result"]["content"][0]["text"], "finally");
}
