//! Command-line and environment configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::server::{DEFAULT_USER, SERVER_NAME};

/// Default HTTP bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:2906";

/// Where grant decisions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthorizerKind {
    /// No tool is gated.
    None,
    /// In-process OAuth provider configured from the manifest.
    Local,
    /// External authorization service.
    Remote,
}

/// MCP server exposing HTTP tool backends behind per-user consent.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolgate-mcp")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Serve MCP over stdio instead of HTTP.
    #[arg(long)]
    pub stdio: bool,

    /// HTTP bind address.
    #[arg(long, env = "TOOLGATE_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Server name reported by `initialize`.
    #[arg(long, env = "TOOLGATE_SERVER_NAME", default_value = SERVER_NAME)]
    pub server_name: String,

    /// Tool manifest (JSON).
    #[arg(long, env = "TOOLGATE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Require a bearer token on `/mcp`.
    #[arg(long, env = "TOOLGATE_AUTH_REQUIRED")]
    pub auth_required: bool,

    /// Accepted bearer tokens, as `TOKEN` or `USER=TOKEN`.
    #[arg(
        long = "bearer-token",
        env = "TOOLGATE_BEARER_TOKENS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub bearer_tokens: Vec<String>,

    /// Identity used for callers without a user-bound token.
    #[arg(long, env = "TOOLGATE_DEFAULT_USER", default_value = DEFAULT_USER)]
    pub default_user: String,

    /// Authorization provider.
    #[arg(long, env = "TOOLGATE_AUTHORIZER", value_enum, default_value_t = AuthorizerKind::Local)]
    pub authorizer: AuthorizerKind,

    /// Base URL of the remote authorization service.
    #[arg(long, env = "TOOLGATE_AUTHORIZER_URL")]
    pub authorizer_url: Option<String>,

    /// API key for the remote authorization service.
    #[arg(long, env = "TOOLGATE_AUTHORIZER_API_KEY", hide_env_values = true)]
    pub authorizer_api_key: Option<String>,

    /// Persist local OAuth grants to this JSON file.
    #[arg(long, env = "TOOLGATE_GRANT_STORE")]
    pub grant_store: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    pub json_logs: bool,

    /// Log output file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Reject combinations that cannot start.
    pub fn validate(&self) -> Result<(), String> {
        if self.authorizer == AuthorizerKind::Remote && self.authorizer_url.is_none() {
            return Err("--authorizer-url is required with --authorizer remote".into());
        }
        if self.auth_required && !self.stdio && self.bearer_tokens.is_empty() {
            return Err("--auth-required needs at least one --bearer-token".into());
        }
        Ok(())
    }

    /// Whether stdio mode still needs an HTTP listener for OAuth redirects.
    pub fn needs_callback_listener(&self, has_gated_tools: bool) -> bool {
        self.stdio && self.authorizer == AuthorizerKind::Local && has_gated_tools
    }
}
