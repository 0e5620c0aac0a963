//! HTTP client for a running bridge
//!
//! Used by the `agentops` CLI. Sends the proxy secret in `x-proxy-token` so
//! `Authorization` stays free for an optional edge Basic-auth layer.

use reqwest::{header, Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::agents::AgentList;
use crate::bridge::auth::PROXY_TOKEN_HEADER;
use crate::error::{Error, Result};

/// Connection settings for [`ProxyClient`]
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Bridge base URL, e.g. `https://ops.example.com`
    pub base_url: String,
    /// Shared bridge secret
    pub token: SecretString,
    /// Edge Basic-auth credentials, sent only when both are set
    pub basic_auth: Option<(String, SecretString)>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ProxyConfig {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        ProxyConfig {
            base_url: base_url.into(),
            token,
            basic_auth: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, pass: SecretString) -> Self {
        self.basic_auth = Some((user.into(), pass));
        self
    }
}

#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
    config: ProxyConfig,
}

impl ProxyClient {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("PROXY_BASE_URL is required".to_string()));
        }
        url::Url::parse(&config.base_url).map_err(|e| {
            Error::Config(format!("Invalid PROXY_BASE_URL {}: {}", config.base_url, e))
        })?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            PROXY_TOKEN_HEADER,
            header::HeaderValue::from_str(config.token.expose_secret())
                .map_err(|e| Error::Config(format!("Invalid PROXY_TOKEN format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(ProxyClient { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.basic_auth {
            Some((user, pass)) => request.basic_auth(user, Some(pass.expose_secret())),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = self
            .authorize(request)
            .header(header::CACHE_CONTROL, "no-store")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = if body.is_empty() {
                status.canonical_reason().unwrap_or("").to_string()
            } else {
                body
            };
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        debug!("GET {}", path);
        self.send(self.client.get(self.url(path))).await
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<Value> {
        self.get_json("/health").await
    }

    /// `GET /sessions`
    pub async fn sessions(&self) -> Result<Value> {
        self.get_json("/sessions").await
    }

    /// `GET /history` for one session
    pub async fn history(&self, session_key: &str) -> Result<Value> {
        debug!("GET /history sessionKey={}", session_key);
        let request = self
            .client
            .get(self.url("/history"))
            .query(&[("sessionKey", session_key)]);
        self.send(request).await
    }

    /// `GET /agents`
    pub async fn agents(&self) -> Result<AgentList> {
        let payload = self.get_json("/agents").await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// `POST /nudge`
    pub async fn nudge(&self, session_key: &str, message: &str) -> Result<Value> {
        debug!("POST /nudge sessionKey={}", session_key);
        let request = self
            .client
            .post(self.url("/nudge"))
            .json(&json!({ "sessionKey": session_key, "message": message }));
        self.send(request).await
    }
}
