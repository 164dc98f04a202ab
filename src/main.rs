//! toolgate-mcp - consent-gated MCP tool server
//!
//! Loads a tool manifest, wires the authorization provider and serves MCP
//! over HTTP or stdio.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolgate_mcp::backend::{http_client, RemoteAuthorizer};
use toolgate_mcp::config::{AuthorizerKind, Config};
use toolgate_mcp::manifest::ToolManifest;
use toolgate_mcp::oauth::OAuthAuthorizer;
use toolgate_mcp::server::{SERVER_NAME, SERVER_VERSION};
use toolgate_mcp::{ArgumentNormalizer, AuthorizationGate, CallerContext, McpServer, ToolRegistry};

/// Timeout for calls to a remote authorization service.
const AUTHORIZER_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to set up logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!("Starting {} v{}", SERVER_NAME, SERVER_VERSION);

    match run(config).await {
        Ok(()) => {
            tracing::info!("Server exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Server error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Never stdout: it carries the protocol in stdio mode.
    let writer = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(config.log_file.is_none()),
            )
            .init();
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate().map_err(anyhow::Error::msg)?;

    let manifest = match &config.manifest {
        Some(path) => ToolManifest::load(path)
            .await
            .with_context(|| format!("loading manifest {}", path.display()))?,
        None => {
            tracing::warn!("No manifest given; serving an empty tool list");
            ToolManifest::default()
        }
    };

    let mut registry = ToolRegistry::new();
    let mut normalizer = ArgumentNormalizer::standard();
    manifest.install(&mut registry, &mut normalizer)?;
    tracing::info!("{} tools registered", registry.len());

    let mut oauth = None;
    let gate = match config.authorizer {
        AuthorizerKind::None => {
            tracing::warn!("Authorization disabled; gated tools run without consent");
            AuthorizationGate::open()
        }
        AuthorizerKind::Local => {
            let authorizer = match &config.grant_store {
                Some(path) => OAuthAuthorizer::with_store(manifest.oauth_providers.clone(), path)
                    .await
                    .with_context(|| format!("loading grant store {}", path.display()))?,
                None => OAuthAuthorizer::new(manifest.oauth_providers.clone()),
            };
            for tool in registry.list() {
                if let Some(provider) = &tool.auth_provider {
                    if !authorizer.has_provider(provider) {
                        tracing::warn!(
                            "Tool {} needs provider '{}', which the manifest does not configure",
                            tool.name,
                            provider
                        );
                    }
                }
            }
            let authorizer = Arc::new(authorizer);
            oauth = Some(authorizer.clone());
            AuthorizationGate::new(authorizer)
        }
        AuthorizerKind::Remote => {
            let url = config
                .authorizer_url
                .clone()
                .context("--authorizer-url is required with --authorizer remote")?;
            tracing::info!("Using remote authorization service at {}", url);
            let client = http_client(Some(AUTHORIZER_TIMEOUT))?;
            AuthorizationGate::new(Arc::new(RemoteAuthorizer::new(
                url,
                config.authorizer_api_key.clone(),
                client,
            )))
        }
    };

    let has_gated_tools = registry.list().iter().any(|tool| tool.auth_provider.is_some());
    let server = McpServer::new(Arc::new(registry), gate)
        .with_server_name(&config.server_name)
        .with_normalizer(normalizer);

    if config.stdio {
        if let Some(oauth) = oauth.filter(|_| config.needs_callback_listener(has_gated_tools)) {
            spawn_callback_listener(&config.bind, oauth)?;
        }
        return run_stdio(&server, CallerContext::new(&config.default_user)).await;
    }
    run_http(&config, server, oauth).await
}

#[cfg(feature = "http")]
fn spawn_callback_listener(bind: &str, oauth: Arc<OAuthAuthorizer>) -> anyhow::Result<()> {
    let bind = bind.to_string();
    tokio::spawn(async move {
        if let Err(e) = toolgate_mcp::http::serve_callback(&bind, oauth).await {
            tracing::error!("OAuth callback listener failed: {}", e);
        }
    });
    Ok(())
}

#[cfg(not(feature = "http"))]
fn spawn_callback_listener(_bind: &str, _oauth: Arc<OAuthAuthorizer>) -> anyhow::Result<()> {
    anyhow::bail!("gated tools in stdio mode need the `http` feature for the OAuth callback")
}

#[cfg(feature = "stdio")]
async fn run_stdio(server: &McpServer, caller: CallerContext) -> anyhow::Result<()> {
    server.run_stdio(caller).await?;
    Ok(())
}

#[cfg(not(feature = "stdio"))]
async fn run_stdio(_server: &McpServer, _caller: CallerContext) -> anyhow::Result<()> {
    anyhow::bail!("stdio transport not compiled in (enable the `stdio` feature)")
}

#[cfg(feature = "http")]
async fn run_http(
    config: &Config,
    server: McpServer,
    oauth: Option<Arc<OAuthAuthorizer>>,
) -> anyhow::Result<()> {
    use toolgate_mcp::http::{serve, BearerAuth, HttpState};

    let auth = if config.auth_required {
        BearerAuth::required(&config.bearer_tokens, &config.default_user)?
    } else {
        BearerAuth::disabled(&config.default_user)
    };
    tracing::info!(
        "Bearer authentication {}",
        if auth.is_required() { "enforced" } else { "disabled" }
    );

    let mut state = HttpState::new(server, auth);
    if let Some(oauth) = oauth {
        state = state.with_oauth(oauth);
    }
    serve(&config.bind, state).await?;
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn run_http(
    _config: &Config,
    _server: McpServer,
    _oauth: Option<Arc<OAuthAuthorizer>>,
) -> anyhow::Result<()> {
    anyhow::bail!("HTTP transport not compiled in (enable the `http` feature); use --stdio")
}
