//! MCP request dispatcher and stdio transport.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::arguments::ArgumentNormalizer;
use crate::authorization::{AuthorizationGate, GateDecision};
use crate::error::{codes, Error, Result};
use crate::invoker::ToolInvoker;
use crate::protocol::{
    InitializeParams, InitializeResult, InteractionData, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ServerCapabilities, ServerInfo, ToolCallParams,
};
use crate::tools::ToolRegistry;

/// MCP protocol version.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Default server name.
pub const SERVER_NAME: &str = "toolgate-mcp";

/// Server version.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity used when the transport does not authenticate the caller.
pub const DEFAULT_USER: &str = "anonymous";

/// HTTP status for `notifications/initialized`.
pub const STATUS_ACCEPTED: u16 = 202;

/// Who is calling. Grants are requested on this identity's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// Caller identity.
    pub user_identity: String,
}

impl CallerContext {
    /// Context for `user_identity`.
    pub fn new(user_identity: impl Into<String>) -> Self {
        Self {
            user_identity: user_identity.into(),
        }
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::new(DEFAULT_USER)
    }
}

/// A response envelope plus the transport status it maps to.
#[derive(Debug, Clone)]
pub struct Reply {
    /// HTTP-style status code.
    pub status: u16,
    /// Response envelope.
    pub response: JsonRpcResponse,
}

impl Reply {
    /// Reply with the status derived from the envelope.
    pub fn new(response: JsonRpcResponse) -> Self {
        Self {
            status: response.http_status(),
            response,
        }
    }

    /// Reply acknowledging a notification.
    pub fn accepted(response: JsonRpcResponse) -> Self {
        Self {
            status: STATUS_ACCEPTED,
            response,
        }
    }

    /// Whether the reply only acknowledges a notification.
    pub fn is_accepted(&self) -> bool {
        self.status == STATUS_ACCEPTED
    }
}

impl From<JsonRpcResponse> for Reply {
    fn from(response: JsonRpcResponse) -> Self {
        Self::new(response)
    }
}

/// MCP server: routes JSON-RPC requests to the registry, gate and invoker.
///
/// Cheap to clone; every clone shares the same registry and provider state.
#[derive(Debug, Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    gate: AuthorizationGate,
    normalizer: Arc<ArgumentNormalizer>,
    invoker: ToolInvoker,
    server_info: ServerInfo,
}

impl McpServer {
    /// Server over `registry`, guarded by `gate`.
    pub fn new(registry: Arc<ToolRegistry>, gate: AuthorizationGate) -> Self {
        Self {
            registry,
            gate,
            normalizer: Arc::new(ArgumentNormalizer::standard()),
            invoker: ToolInvoker::new(),
            server_info: ServerInfo {
                name: SERVER_NAME.into(),
                version: SERVER_VERSION.into(),
            },
        }
    }

    /// Override the advertised server name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_info.name = name.into();
        self
    }

    /// Replace the argument normalizer.
    pub fn with_normalizer(mut self, normalizer: ArgumentNormalizer) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    /// Advertised server name.
    pub fn server_name(&self) -> &str {
        &self.server_info.name
    }

    /// The tool registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Capability probe answered on a bare GET.
    pub fn probe(&self) -> Reply {
        JsonRpcResponse::success(0, self.initialize_result()).into()
    }

    /// Handle one request envelope.
    pub async fn handle_message(&self, json: &str, caller: &CallerContext) -> Reply {
        let request = match JsonRpcRequest::parse(json) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejected request envelope: {}", e);
                return JsonRpcResponse::from_error(0, &e).into();
            }
        };

        let id = request.id();
        tracing::debug!("Handling {} (id {})", request.method, id);

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params).into(),
            "notifications/initialized" => {
                tracing::info!("Client initialized");
                Reply::accepted(JsonRpcResponse::success(id, json!({})))
            }
            "tools/list" => self.handle_tools_list(id).into(),
            "tools/call" => self.handle_tools_call(id, request.params, caller).await.into(),
            other => JsonRpcResponse::from_error(id, &Error::MethodNotFound(other.to_string())).into(),
        }
    }

    /// Serve newline-delimited JSON from `reader`, writing replies to `writer`.
    ///
    /// Requests are handled concurrently, so replies may come out of order.
    /// Notification acknowledgements are not written. Returns the writer once
    /// `reader` is exhausted and every reply has been flushed.
    pub async fn serve_lines<R, W>(&self, mut reader: R, mut writer: W, caller: CallerContext) -> Result<W>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                tracing::debug!("Sending: {}", line);
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<W, std::io::Error>(writer)
        });

        let mut handlers = JoinSet::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    tracing::warn!("Dropping request that is not valid UTF-8: {}", e);
                    let reply = JsonRpcResponse::from_error(
                        0,
                        &Error::InvalidRequest("request is not valid UTF-8".into()),
                    );
                    match serde_json::to_string(&reply) {
                        Ok(json) => {
                            let _ = tx.send(json);
                        }
                        Err(e) => tracing::error!("Failed to encode reply: {}", e),
                    }
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            tracing::debug!("Received: {}", line);

            let server = self.clone();
            let caller = caller.clone();
            let tx = tx.clone();
            handlers.spawn(async move {
                let reply = server.handle_message(&line, &caller).await;
                if reply.is_accepted() {
                    return;
                }
                match serde_json::to_string(&reply.response) {
                    Ok(json) => {
                        let _ = tx.send(json);
                    }
                    Err(e) => tracing::error!("Failed to encode reply: {}", e),
                }
            });
        }

        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Request handler failed: {}", e);
            }
        }
        drop(tx);

        let writer = writer_task
            .await
            .map_err(|e| Error::Internal(format!("stdio writer failed: {}", e)))??;
        Ok(writer)
    }

    /// Run the server on stdio.
    #[cfg(feature = "stdio")]
    pub async fn run_stdio(&self, caller: CallerContext) -> Result<()> {
        tracing::info!("MCP server starting on stdio");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve_lines(stdin, tokio::io::stdout(), caller).await?;
        tracing::info!("MCP server shutting down");
        Ok(())
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities::default(),
            server_info: self.server_info.clone(),
        }
    }

    fn handle_initialize(&self, id: i64, params: Option<Map<String, Value>>) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(Value::Object(p)).ok())
            .unwrap_or_default();
        if let Some(client) = &params.client_info {
            tracing::info!(
                "Initialize from {} {} (protocol {})",
                client.name,
                client.version,
                params.protocol_version.as_deref().unwrap_or("unspecified")
            );
        }
        JsonRpcResponse::success(id, self.initialize_result())
    }

    fn handle_tools_list(&self, id: i64) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            ListToolsResult {
                tools: self.registry.list_tools(),
            },
        )
    }

    async fn handle_tools_call(
        &self,
        id: i64,
        params: Option<Map<String, Value>>,
        caller: &CallerContext,
    ) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(Value::Object(p)) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::from_error(
                        id,
                        &Error::InvalidParams(format!("invalid tool call params: {}", e)),
                    );
                }
            },
            None => {
                return JsonRpcResponse::from_error(
                    id,
                    &Error::InvalidParams("missing field `name`".into()),
                );
            }
        };

        let span = tracing::info_span!(
            "tools_call",
            correlation_id = %Uuid::new_v4(),
            tool = %params.name,
            user = %caller.user_identity,
        );
        self.call_tool(id, params, caller).instrument(span).await
    }

    async fn call_tool(&self, id: i64, params: ToolCallParams, caller: &CallerContext) -> JsonRpcResponse {
        let Some(tool) = self.registry.find(&params.name) else {
            tracing::warn!("Tool {} not found", params.name);
            return JsonRpcResponse::from_error(id, &Error::ToolNotFound(params.name));
        };

        match self.gate.check(tool, &caller.user_identity).await {
            Ok(GateDecision::Ready) => {}
            Ok(GateDecision::PendingAuthorization { grant_id, url }) => {
                tracing::info!(grant_id = %grant_id, "Authorization pending");
                let data = serde_json::to_value(InteractionData::url(grant_id, url))
                    .unwrap_or_default();
                return JsonRpcResponse::error_with_data(
                    id,
                    codes::INTERACTION_REQUIRED,
                    "interaction_required",
                    data,
                );
            }
            Err(e) => {
                tracing::error!("Authorization check failed: {}", e);
                return JsonRpcResponse::from_error(id, &e);
            }
        }

        let arguments = match self.normalizer.clean(
            &tool.name,
            tool.input_schema.as_ref(),
            params.arguments.unwrap_or_default(),
        ) {
            Ok(arguments) => arguments,
            Err(e) => {
                tracing::error!("Rejected arguments: {}", e);
                return JsonRpcResponse::from_error(id, &e);
            }
        };

        match self.invoker.invoke(tool, arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::from_error(id, &e),
        }
    }
}
