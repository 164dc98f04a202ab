//! In-process OAuth consent provider.
//!
//! Issues authorization URLs for configured OAuth providers and tracks one
//! grant per (tool, provider, user). The `state` parameter of the URL is the
//! grant id, so the redirect back to `/oauth/callback` identifies which
//! grant to complete. Exchanging the authorization code for tokens is left
//! to whatever consumes the grant; the code and PKCE verifier are kept on
//! the record for that purpose.
//!
//! Grants can be persisted to a JSON file so that an agent retrying after a
//! restart resumes the same grant instead of being sent a fresh link.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use url::Url;
use uuid::Uuid;

use crate::authorization::{AuthorizationProvider, Grant, GrantRequest, GrantStatus};
use crate::error::{Error, Result};

/// One OAuth authorization server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    /// Authorization endpoint.
    pub auth_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// Redirect URI registered for this client; normally this server's `/oauth/callback`.
    pub redirect_uri: String,
    /// Scopes to request.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Whether to send a PKCE S256 challenge.
    #[serde(default)]
    pub pkce: bool,
    /// Extra query parameters (e.g. `access_type=offline`).
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

/// Stored grant plus the OAuth bookkeeping around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRecord {
    /// The grant as reported to the gate.
    pub grant: Grant,
    /// PKCE verifier matching the challenge in the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    /// Authorization code returned on the callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,
    /// When the grant was requested.
    pub created_at: DateTime<Utc>,
    /// When consent was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
struct GrantTable {
    by_scope: HashMap<GrantRequest, GrantRecord>,
    by_state: HashMap<String, GrantRequest>,
}

impl GrantTable {
    fn from_records(records: Vec<GrantRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            table.insert(record);
        }
        table
    }

    fn insert(&mut self, record: GrantRecord) {
        let scope = GrantRequest {
            tool_name: record.grant.tool_name.clone(),
            provider: record.grant.provider.clone(),
            user_identity: record.grant.user_identity.clone(),
        };
        self.by_state.insert(record.grant.id.clone(), scope.clone());
        self.by_scope.insert(scope, record);
    }

    fn records(&self) -> Vec<GrantRecord> {
        let mut records: Vec<_> = self.by_scope.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

/// OAuth-backed [`AuthorizationProvider`].
pub struct OAuthAuthorizer {
    providers: HashMap<String, OAuthProviderConfig>,
    grants: RwLock<GrantTable>,
    store: Option<PathBuf>,
}

impl OAuthAuthorizer {
    /// Authorizer for the given providers, keeping grants in memory only.
    pub fn new(providers: HashMap<String, OAuthProviderConfig>) -> Self {
        Self {
            providers,
            grants: RwLock::new(GrantTable::default()),
            store: None,
        }
    }

    /// Authorizer persisting grants to `path`, loading any grants already there.
    pub async fn with_store(
        providers: HashMap<String, OAuthProviderConfig>,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let path = path.into();
        let records: Vec<GrantRecord> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Loaded {} grants from {}", records.len(), path.display());

        Ok(Self {
            providers,
            grants: RwLock::new(GrantTable::from_records(records)),
            store: Some(path),
        })
    }

    /// Whether a provider of that name is configured.
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Complete the pending grant whose `state` matches.
    pub async fn complete(&self, state: &str, code: Option<&str>) -> Result<Grant> {
        let mut table = self.grants.write().await;
        let scope = table
            .by_state
            .get(state)
            .cloned()
            .ok_or_else(|| Error::Provider(format!("unknown authorization state: {}", state)))?;

        // Staged on a copy; memory only changes once the store accepted it.
        let mut next = table.clone();
        let record = next
            .by_scope
            .get_mut(&scope)
            .filter(|record| record.grant.id == state)
            .ok_or_else(|| Error::Provider(format!("authorization state {} is stale", state)))?;
        if record.grant.status != GrantStatus::Pending {
            return Ok(record.grant.clone());
        }

        record.grant.status = GrantStatus::Completed;
        record.grant.authorization_url = None;
        record.authorization_code = code.map(str::to_string);
        record.completed_at = Some(Utc::now());
        let grant = record.grant.clone();

        self.persist(&next).await?;
        *table = next;
        tracing::info!(grant_id = %grant.id, tool = %grant.tool_name, "Authorization completed");
        Ok(grant)
    }

    /// Snapshot of every known grant.
    pub async fn grants(&self) -> Vec<GrantRecord> {
        self.grants.read().await.records()
    }

    fn issue(&self, request: &GrantRequest) -> Result<GrantRecord> {
        let config = self.providers.get(&request.provider).ok_or_else(|| {
            Error::Provider(format!("unsupported OAuth provider: {}", request.provider))
        })?;

        let state = format!("ar_{}", Uuid::new_v4().simple());
        let code_verifier = config.pkce.then(generate_code_verifier);
        let url = authorization_url(config, &state, code_verifier.as_deref())?;

        Ok(GrantRecord {
            grant: Grant {
                id: state,
                tool_name: request.tool_name.clone(),
                provider: request.provider.clone(),
                user_identity: request.user_identity.clone(),
                status: GrantStatus::Pending,
                authorization_url: Some(url),
            },
            code_verifier,
            authorization_code: None,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    async fn persist(&self, table: &GrantTable) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&table.records())?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl fmt::Debug for OAuthAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<_> = self.providers.keys().collect();
        providers.sort();
        f.debug_struct("OAuthAuthorizer")
            .field("providers", &providers)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl AuthorizationProvider for OAuthAuthorizer {
    async fn authorize(&self, request: &GrantRequest) -> Result<Grant> {
        if let Some(record) = self.grants.read().await.by_scope.get(request) {
            return Ok(record.grant.clone());
        }

        let mut table = self.grants.write().await;
        // Another call may have issued the grant between the two locks.
        if let Some(record) = table.by_scope.get(request) {
            return Ok(record.grant.clone());
        }

        let record = self.issue(request)?;
        let grant = record.grant.clone();
        tracing::info!(
            grant_id = %grant.id,
            provider = %grant.provider,
            tool = %grant.tool_name,
            "Issued authorization request"
        );
        let mut next = table.clone();
        next.insert(record);
        self.persist(&next).await?;
        *table = next;
        Ok(grant)
    }
}

/// Build the authorization URL for `config`, embedding `state` and the PKCE challenge.
pub fn authorization_url(
    config: &OAuthProviderConfig,
    state: &str,
    code_verifier: Option<&str>,
) -> Result<String> {
    let mut url = Url::parse(&config.auth_url)
        .map_err(|e| Error::Provider(format!("invalid auth_url {}: {}", config.auth_url, e)))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &config.scopes.join(" "))
            .append_pair("state", state);
        if let Some(verifier) = code_verifier {
            query
                .append_pair("code_challenge", &code_challenge(verifier))
                .append_pair("code_challenge_method", "S256");
        }
        for (key, value) in &config.extra_params {
            query.append_pair(key, value);
        }
    }
    Ok(url.into())
}

/// Random PKCE code verifier (43 URL-safe characters).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for `verifier`.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
