//! Tool manifest: which tools to expose, where they run, who guards them.
//!
//! ```json
//! {
//!   "sources": [
//!     {
//!       "prefix": "web_",
//!       "api_key_env": "TOOLS_API_KEY",
//!       "timeout_ms": 60000,
//!       "tools": [
//!         {
//!           "name": "Web_ScrapeUrl",
//!           "description": "Scrape a web page",
//!           "endpoint": "https://tools.example.com/web/scrape",
//!           "input_schema": {"type": "object", "properties": {"url": {"type": "string"}}},
//!           "policy": "scrape"
//!         }
//!       ]
//!     }
//!   ],
//!   "oauth_providers": {
//!     "google": {
//!       "auth_url": "https://accounts.google.com/o/oauth2/auth",
//!       "client_id": "...",
//!       "redirect_uri": "http://localhost:2906/oauth/callback",
//!       "scopes": ["https://www.googleapis.com/auth/gmail.send"]
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arguments::{ArgumentNormalizer, PolicyKind};
use crate::backend::{http_client, HttpTool};
use crate::error::{Error, Result};
use crate::oauth::OAuthProviderConfig;
use crate::tools::{normalize_tool_name, Tool, ToolRegistry};

/// Top-level manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Tool sources, registered in order.
    #[serde(default)]
    pub sources: Vec<ToolSource>,
    /// OAuth providers for the local authorizer, by name.
    #[serde(default)]
    pub oauth_providers: HashMap<String, OAuthProviderConfig>,
}

/// A group of tools sharing a backend, credentials and name prefix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSource {
    /// Prefix stripped from tool names (case-insensitive).
    #[serde(default)]
    pub prefix: Option<String>,
    /// Environment variable holding the backend API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Per-call timeout for this source's backend.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// The tools.
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

/// One tool in a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    /// Name as the backend knows it.
    pub name: String,
    /// Description shown to the agent.
    #[serde(default)]
    pub description: String,
    /// Endpoint receiving the call.
    pub endpoint: String,
    /// JSON Schema of the arguments.
    #[serde(default)]
    pub input_schema: Option<Value>,
    /// Authorization provider guarding the tool.
    #[serde(default)]
    pub auth_provider: Option<String>,
    /// Argument policy override.
    #[serde(default)]
    pub policy: Option<PolicyKind>,
}

impl ToolManifest {
    /// Read a manifest from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Manifest(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_slice(&bytes)
    }

    /// Parse a manifest from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Manifest(e.to_string()))
    }

    /// Register every tool into `registry` and bind policy overrides into `normalizer`.
    ///
    /// API keys are read from the environment here, once.
    pub fn install(&self, registry: &mut ToolRegistry, normalizer: &mut ArgumentNormalizer) -> Result<()> {
        for source in &self.sources {
            let client = http_client(source.timeout_ms.map(Duration::from_millis))?;
            let api_key = match &source.api_key_env {
                Some(var) => {
                    let key = std::env::var(var).ok();
                    if key.is_none() {
                        tracing::warn!("{} is not set; calling backend without credentials", var);
                    }
                    key
                }
                None => None,
            };

            let prefix = source.prefix.as_deref();
            for entry in &source.tools {
                let tool = HttpTool::new(&entry.name, &entry.endpoint, client.clone())
                    .with_description(&entry.description)
                    .with_input_schema(entry.input_schema.clone())
                    .with_auth_provider(entry.auth_provider.clone())
                    .with_api_key(api_key.clone());
                registry.register_tool(prefix, Arc::new(tool) as Arc<dyn Tool>);

                if let Some(kind) = entry.policy {
                    normalizer.bind_kind(&normalize_tool_name(&entry.name, prefix), kind);
                }
            }
            tracing::info!(
                "Registered {} tools from source (prefix: {})",
                source.tools.len(),
                prefix.unwrap_or("none")
            );
        }
        Ok(())
    }
}
