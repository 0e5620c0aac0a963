//! Gateway protocol types
//!
//! Parameter types for the gateway methods the bridge calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::schema::PROTOCOL_VERSION;

// ============================================================================
// Handshake
// ============================================================================

/// Scopes requested by an operator console
pub const OPERATOR_SCOPES: [&str; 3] = ["operator.read", "operator.write", "operator.admin"];

/// Client identity presented in the connect request.
///
/// The gateway validates `id` and `mode` against an allowlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client id
    pub id: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Client version
    pub version: String,
    /// Platform the client runs on
    pub platform: String,
    /// Operating mode
    pub mode: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        ClientInfo {
            id: "cli".to_string(),
            display_name: Some("agentops-bridge".to_string()),
            version: crate::VERSION.to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "cli".to_string(),
        }
    }
}

/// Credential presented in the connect request
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectAuth {
    /// Bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ConnectAuth")
            .field("token", &redact(&self.token))
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// Parameters of the `connect` request.
///
/// Built once per session and never mutated. Carries no challenge payload and
/// no device signature: the gateway must accept token/password or insecure auth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version accepted
    pub min_protocol: u32,
    /// Highest protocol version accepted
    pub max_protocol: u32,
    /// Client identity
    pub client: ClientInfo,
    /// Requested role
    pub role: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Advertised capabilities
    pub caps: Vec<String>,
    /// Advertised commands
    pub commands: Vec<String>,
    /// Requested permissions
    pub permissions: Map<String, Value>,
    /// Credential
    pub auth: ConnectAuth,
    /// Locale
    pub locale: String,
    /// User agent
    pub user_agent: String,
}

impl ConnectParams {
    /// Connect parameters for an operator client with the full operator scope set
    pub fn operator(client: ClientInfo, auth: ConnectAuth) -> Self {
        ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client,
            role: "operator".to_string(),
            scopes: OPERATOR_SCOPES.iter().map(|s| s.to_string()).collect(),
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: Map::new(),
            auth,
            locale: "en-US".to_string(),
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

// ============================================================================
// Methods
// ============================================================================

/// Method names
pub mod methods {
    /// Connect handshake
    pub const CONNECT: &str = "connect";
    /// List sessions
    pub const SESSIONS_LIST: &str = "sessions.list";
    /// Conversation history of one session
    pub const CHAT_HISTORY: &str = "chat.history";
}

/// `sessions.list` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsListParams {
    /// Maximum results
    pub limit: u32,
}

/// `chat.history` parameters.
///
/// Only fields every gateway build accepts; some reject `includeTools`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryParams {
    /// Session key
    pub session_key: String,
    /// Maximum messages
    pub limit: u32,
}

/// Nudge parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgeParams {
    /// Session key
    pub session_key: String,
    /// Operator message injected into the conversation
    pub message: String,
}

// ============================================================================
// Events
// ============================================================================

/// Event names
pub mod events {
    /// First frame the gateway sends on a new connection
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
}
