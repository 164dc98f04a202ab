//! HTTP transport.
//!
//! | route | |
//! |---|---|
//! | `GET /mcp` | capability probe |
//! | `POST /mcp` | JSON-RPC dispatch |
//! | `GET /oauth/callback` | completes a local OAuth grant |
//! | `GET /health` | liveness |
//!
//! `/mcp` sits behind the bearer-token check when it is enforced.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::oauth::OAuthAuthorizer;
use crate::server::{CallerContext, McpServer, Reply};

/// Maximum accepted `Authorization` header length.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

/// Static bearer-token authentication in front of `/mcp`.
///
/// Tokens are configured as `TOKEN` or `USER=TOKEN`. A matched `USER`
/// becomes the caller identity; otherwise the default user is used.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    required: bool,
    tokens: HashMap<String, Option<String>>,
    default_user: String,
}

impl BearerAuth {
    /// Accept every request as `default_user`.
    pub fn disabled(default_user: impl Into<String>) -> Self {
        Self {
            required: false,
            tokens: HashMap::new(),
            default_user: default_user.into(),
        }
    }

    /// Require one of `specs` (`TOKEN` or `USER=TOKEN`).
    pub fn required<I, S>(specs: I, default_user: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tokens = HashMap::new();
        for spec in specs {
            let spec = spec.as_ref().trim();
            let (user, token) = match spec.split_once('=') {
                Some((user, token)) => (Some(user.trim().to_string()), token.trim()),
                None => (None, spec),
            };
            if token.is_empty() {
                return Err(Error::Unauthorized(format!("empty bearer token in '{}'", spec)));
            }
            tokens.insert(token.to_string(), user.filter(|u| !u.is_empty()));
        }
        if tokens.is_empty() {
            return Err(Error::Unauthorized(
                "authentication is required but no bearer tokens are configured".into(),
            ));
        }
        Ok(Self {
            required: true,
            tokens,
            default_user: default_user.into(),
        })
    }

    /// Whether requests must present a token.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Resolve the caller from an `Authorization` header value.
    pub fn authenticate(&self, header: Option<&str>) -> Result<CallerContext> {
        if !self.required {
            return Ok(CallerContext::new(&self.default_user));
        }
        let token = parse_bearer_token(header)?;
        match self.tokens.get(token) {
            Some(user) => Ok(CallerContext::new(
                user.as_deref().unwrap_or(&self.default_user),
            )),
            None => Err(Error::Unauthorized("invalid bearer token".into())),
        }
    }
}

fn parse_bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or_else(|| Error::Unauthorized("missing authorization".into()))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(Error::Unauthorized("authorization header too large".into()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(Error::Unauthorized("invalid authorization header".into()));
    }
    Ok(token)
}

/// Shared state of the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpState {
    server: McpServer,
    auth: Arc<BearerAuth>,
    oauth: Option<Arc<OAuthAuthorizer>>,
}

impl HttpState {
    /// State serving `server` behind `auth`.
    pub fn new(server: McpServer, auth: BearerAuth) -> Self {
        Self {
            server,
            auth: Arc::new(auth),
            oauth: None,
        }
    }

    /// Expose `/oauth/callback` for a local OAuth authorizer.
    pub fn with_oauth(mut self, oauth: Arc<OAuthAuthorizer>) -> Self {
        self.oauth = Some(oauth);
        self
    }
}

/// Build the router.
pub fn router(state: HttpState) -> Router {
    let mcp = Router::new()
        .route("/mcp", get(probe).post(dispatch))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let oauth = state.oauth.clone();
    let mut app = Router::new()
        .merge(mcp)
        .route("/health", get(health))
        .with_state(state);
    if let Some(oauth) = oauth {
        app = app.merge(callback_routes(oauth));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

/// Router serving only `/oauth/callback`, for stdio mode.
pub fn callback_router(oauth: Arc<OAuthAuthorizer>) -> Router {
    callback_routes(oauth).layer(TraceLayer::new_for_http())
}

fn callback_routes(oauth: Arc<OAuthAuthorizer>) -> Router {
    Router::new()
        .route("/oauth/callback", get(oauth_callback))
        .with_state(oauth)
}

/// Serve on `bind` until Ctrl-C.
pub async fn serve(bind: &str, state: HttpState) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!("MCP server listening on http://{}/mcp", listener.local_addr()?);
    serve_router(listener, router(state)).await
}

/// Serve only the OAuth callback on `bind` until Ctrl-C.
pub async fn serve_callback(bind: &str, oauth: Arc<OAuthAuthorizer>) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(
        "OAuth callback listening on http://{}/oauth/callback",
        listener.local_addr()?
    );
    serve_router(listener, callback_router(oauth)).await
}

async fn serve_router(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("HTTP listener shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn require_bearer(State(state): State<HttpState>, mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match state.auth.authenticate(header) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!("Rejected request: {}", e);
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({"detail": e.to_string()})),
            )
                .into_response()
        }
    }
}

fn reply_response(reply: Reply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.response)).into_response()
}

async fn probe(State(state): State<HttpState>) -> Response {
    reply_response(state.server.probe())
}

async fn dispatch(
    State(state): State<HttpState>,
    Extension(caller): Extension<CallerContext>,
    body: Bytes,
) -> Response {
    let body = String::from_utf8_lossy(&body);
    reply_response(state.server.handle_message(&body, &caller).await)
}

async fn health(State(state): State<HttpState>) -> Response {
    Json(json!({"status": "ok", "service": state.server.server_name()})).into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    state: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn oauth_callback(
    State(oauth): State<Arc<OAuthAuthorizer>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        tracing::warn!("Authorization for state {} denied: {}", params.state, error);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": format!("authorization denied: {}", error)})),
        )
            .into_response();
    }

    match oauth.complete(&params.state, params.code.as_deref()).await {
        Ok(grant) => Json(json!({
            "status": "completed",
            "grant_id": grant.id,
            "tool": grant.tool_name,
            "message": "Authorization complete. You can return to your agent and retry the tool."
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!("Authorization callback rejected: {}", e);
            (StatusCode::BAD_REQUEST, Json(json!({"detail": e.to_string()}))).into_response()
        }
    }
}
