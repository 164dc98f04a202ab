//! HTTP-backed tool handles and remote authorization.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authorization::{AuthorizationProvider, Grant, GrantRequest, GrantStatus};
use crate::error::{Error, Result};
use crate::tools::Tool;

/// A tool executed by POSTing its arguments to an HTTP endpoint.
///
/// JSON replies come back as values; any other body is returned as a
/// string. Non-success statuses become errors carrying the body.
#[derive(Debug, Clone)]
pub struct HttpTool {
    name: String,
    description: String,
    input_schema: Option<Value>,
    auth_provider: Option<String>,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpTool {
    /// Tool `name` served at `endpoint`.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: None,
            auth_provider: None,
            endpoint: endpoint.into(),
            api_key: None,
            client,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema.
    pub fn with_input_schema(mut self, schema: Option<Value>) -> Self {
        self.input_schema = schema;
        self
    }

    /// Guard the tool behind an authorization provider.
    pub fn with_auth_provider(mut self, provider: Option<String>) -> Self {
        self.auth_provider = provider;
        self
    }

    /// Send `Authorization: Bearer <key>` with each call.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[async_trait::async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Option<Value> {
        self.input_schema.clone()
    }

    fn auth_provider(&self) -> Option<&str> {
        self.auth_provider.as_deref()
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value> {
        let mut request = self.client.post(&self.endpoint).json(&arguments);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::ToolExecution {
                tool: self.name.clone(),
                message: format!("backend returned {}: {}", status, body),
            });
        }

        if is_json {
            Ok(serde_json::from_str(&body)?)
        } else {
            Ok(Value::String(body))
        }
    }
}

/// Build an HTTP client for one tool source.
pub fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

#[derive(Debug, Serialize)]
struct AuthorizeBody<'a> {
    tool_name: &'a str,
    provider: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthorizeReply {
    id: String,
    status: GrantStatus,
    #[serde(default)]
    url: Option<String>,
}

/// Client for an external authorization service.
///
/// `POST {base_url}/v1/auth/authorize` with `{tool_name, provider, user_id}`
/// must answer `{id, status: "pending"|"completed", url?}`. The service
/// returns the existing grant for a scope it has already seen.
#[derive(Debug, Clone)]
pub struct RemoteAuthorizer {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteAuthorizer {
    /// Authorizer talking to `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }
}

#[async_trait::async_trait]
impl AuthorizationProvider for RemoteAuthorizer {
    async fn authorize(&self, request: &GrantRequest) -> Result<Grant> {
        let url = format!("{}/v1/auth/authorize", self.base_url);
        let mut call = self.client.post(&url).json(&AuthorizeBody {
            tool_name: &request.tool_name,
            provider: &request.provider,
            user_id: &request.user_identity,
        });
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| Error::Provider(format!("authorization service unreachable: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provider(format!(
                "authorization service returned {}",
                status
            )));
        }

        let reply: AuthorizeReply = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed authorization reply: {}", e)))?;

        Ok(Grant {
            id: reply.id,
            tool_name: request.tool_name.clone(),
            provider: request.provider.clone(),
            user_identity: request.user_identity.clone(),
            status: reply.status,
            authorization_url: reply.url,
        })
    }
}
