//! Authorization gate for consent-guarded tools.
//!
//! Some tools act on a user's behalf against a third-party account and need
//! that user to complete a consent flow first. Before every `tools/call` the
//! dispatcher asks the [`AuthorizationGate`] whether the tool may run:
//!
//! - tools the provider does not guard are [`GateDecision::Ready`] at once,
//! - guarded tools with a completed grant are `Ready`,
//! - guarded tools with a pending grant are
//!   [`GateDecision::PendingAuthorization`], carrying the URL the human has
//!   to visit. The agent surfaces the link and re-issues the call later.
//!
//! The gate keeps no state between calls. Grant status lives with the
//! [`AuthorizationProvider`], so two concurrent calls for the same pending
//! grant both see the same URL and a retry after consent reaches `Ready`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tools::ToolDescriptor;

/// Grant lifecycle as reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// Waiting for the user to consent.
    Pending,
    /// Consent given.
    Completed,
}

/// Scope a grant is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantRequest {
    /// Normalized tool name.
    pub tool_name: String,
    /// Authorization provider name (e.g. `google`).
    pub provider: String,
    /// Identity the tool acts for.
    pub user_identity: String,
}

/// A provider's record of a consent request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Opaque grant id.
    pub id: String,
    /// Tool the grant covers.
    pub tool_name: String,
    /// Provider that issued it.
    pub provider: String,
    /// User who must consent.
    pub user_identity: String,
    /// Current status.
    pub status: GrantStatus,
    /// Where the user gives consent; present while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
}

impl Grant {
    /// Whether this grant was issued for `request`.
    pub fn covers(&self, request: &GrantRequest) -> bool {
        self.tool_name == request.tool_name
            && self.provider == request.provider
            && self.user_identity == request.user_identity
    }
}

/// External authority that tracks consent grants.
#[async_trait::async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// Whether `tool` needs a grant before it may run.
    async fn requires_auth(&self, tool: &ToolDescriptor) -> Result<bool> {
        Ok(tool.auth_provider.is_some())
    }

    /// Request a grant for `request`, or fetch the existing one.
    async fn authorize(&self, request: &GrantRequest) -> Result<Grant>;
}

/// Provider that guards nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthorization;

#[async_trait::async_trait]
impl AuthorizationProvider for NoAuthorization {
    async fn requires_auth(&self, _tool: &ToolDescriptor) -> Result<bool> {
        Ok(false)
    }

    async fn authorize(&self, request: &GrantRequest) -> Result<Grant> {
        Err(Error::Provider(format!(
            "no authorization provider configured for tool {}",
            request.tool_name
        )))
    }
}

/// Outcome of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The tool may run.
    Ready,
    /// The user still has to consent.
    PendingAuthorization {
        /// Grant id to report to the caller.
        grant_id: String,
        /// URL the user must visit.
        url: String,
    },
}

/// Decides whether a tool call may proceed.
#[derive(Clone)]
pub struct AuthorizationGate {
    provider: Arc<dyn AuthorizationProvider>,
}

impl AuthorizationGate {
    /// Gate backed by `provider`.
    pub fn new(provider: Arc<dyn AuthorizationProvider>) -> Self {
        Self { provider }
    }

    /// Gate that lets every tool through.
    pub fn open() -> Self {
        Self::new(Arc::new(NoAuthorization))
    }

    /// Check whether `tool` may run for `user_identity`.
    pub async fn check(&self, tool: &ToolDescriptor, user_identity: &str) -> Result<GateDecision> {
        if !self.provider.requires_auth(tool).await? {
            return Ok(GateDecision::Ready);
        }

        let provider = tool.auth_provider.clone().ok_or_else(|| {
            Error::Provider(format!("tool {} requires authorization but names no provider", tool.name))
        })?;
        let request = GrantRequest {
            tool_name: tool.name.clone(),
            provider,
            user_identity: user_identity.to_string(),
        };

        tracing::info!("Auth is required for tool: {}", tool.name);
        let grant = self.provider.authorize(&request).await?;
        tracing::debug!(grant_id = %grant.id, status = ?grant.status, "Grant status");

        if !grant.covers(&request) {
            return Err(Error::Provider(format!(
                "grant {} does not cover tool {} for this user",
                grant.id, tool.name
            )));
        }

        match grant.status {
            GrantStatus::Completed => Ok(GateDecision::Ready),
            GrantStatus::Pending => match grant.authorization_url {
                Some(url) if !url.is_empty() => Ok(GateDecision::PendingAuthorization {
                    grant_id: grant.id,
                    url,
                }),
                _ => Err(Error::Provider(format!(
                    "pending grant {} has no authorization url",
                    grant.id
                ))),
            },
        }
    }
}

impl fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGate").finish_non_exhaustive()
    }
}
