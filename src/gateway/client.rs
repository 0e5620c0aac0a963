//! RPC gateway client
//!
//! Thin convenience layer over [`GatewaySession`] for the methods the bridge
//! uses. No retries: one upstream failure is one error.

use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::protocol::{
    methods, ChatHistoryParams, ClientInfo, ConnectAuth, ConnectParams, NudgeParams,
    SessionsListParams,
};
use super::session::{GatewaySession, Subscription};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};

/// Opens ephemeral, authenticated gateway sessions
#[derive(Debug, Clone)]
pub struct GatewayConnector {
    url: String,
    params: ConnectParams,
    timeout: Option<Duration>,
    nudge_method: String,
}

impl GatewayConnector {
    /// Create a connector for `url`
    pub fn new(url: impl Into<String>, params: ConnectParams) -> Self {
        GatewayConnector {
            url: url.into(),
            params,
            timeout: None,
            nudge_method: crate::config::DEFAULT_NUDGE_METHOD.to_string(),
        }
    }

    /// Build a connector from the gateway section of the configuration
    pub fn from_config(config: &GatewayConfig) -> Self {
        let auth = ConnectAuth {
            token: config.token.as_ref().map(|s| s.expose_secret().to_string()),
            password: config.password.as_ref().map(|s| s.expose_secret().to_string()),
        };
        Self::new(config.url.clone(), ConnectParams::operator(ClientInfo::default(), auth))
            .with_timeout(config.timeout)
            .with_nudge_method(config.nudge_method.clone())
    }

    /// Deadline for the handshake and for each call
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Method name used by [`GatewayClient::send_nudge`]
    pub fn with_nudge_method(mut self, method: impl Into<String>) -> Self {
        self.nudge_method = method.into();
        self
    }

    /// Gateway URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a session and complete the handshake within the configured deadline
    pub async fn connect(&self) -> Result<GatewayClient> {
        let open = GatewaySession::open(&self.url, &self.params);
        let session = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, open).await.map_err(|_| {
                Error::Timeout(format!("gateway handshake did not complete within {:?}", limit))
            })??,
            None => open.await?,
        };

        Ok(GatewayClient {
            session,
            timeout: self.timeout,
            nudge_method: self.nudge_method.clone(),
        })
    }
}

/// An open session plus the named operations the bridge calls.
///
/// Dropping the client closes the session.
pub struct GatewayClient {
    session: GatewaySession,
    timeout: Option<Duration>,
    nudge_method: String,
}

impl GatewayClient {
    /// Generic call with the connector's deadline
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.session
            .call_with_timeout(method, params, self.timeout)
            .await
    }

    /// `sessions.list`
    pub async fn list_sessions(&self, limit: u32) -> Result<Value> {
        debug!("sessions.list limit={}", limit);
        self.call(
            methods::SESSIONS_LIST,
            serde_json::to_value(SessionsListParams { limit })?,
        )
        .await
    }

    /// `chat.history` for one session
    pub async fn get_history(&self, session_key: &str, limit: u32) -> Result<Value> {
        debug!("chat.history sessionKey={} limit={}", session_key, limit);
        self.call(
            methods::CHAT_HISTORY,
            serde_json::to_value(ChatHistoryParams {
                session_key: session_key.to_string(),
                limit,
            })?,
        )
        .await
    }

    /// Inject an operator message into a session
    pub async fn send_nudge(&self, session_key: &str, message: &str) -> Result<Value> {
        debug!("{} sessionKey={}", self.nudge_method, session_key);
        self.call(
            &self.nudge_method,
            serde_json::to_value(NudgeParams {
                session_key: session_key.to_string(),
                message: message.to_string(),
            })?,
        )
        .await
    }

    /// Listen for gateway events
    pub fn subscribe(&self) -> Subscription {
        self.session.subscribe()
    }

    /// Underlying session
    pub fn session(&self) -> &GatewaySession {
        &self.session
    }

    /// Close the session now instead of on drop
    pub fn close(&self) {
        self.session.close();
    }
}
