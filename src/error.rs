//! Error types for the AgentOps bridge

use thiserror::Error;

/// Result type alias using the bridge's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The WebSocket connection to the gateway could not be opened or maintained
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection closed before an expected protocol milestone
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The gateway rejected the connect request
    #[error("connect failed: {0}")]
    Auth(serde_json::Value),

    /// A named RPC call returned `ok: false`
    #[error("RPC error: {0}")]
    Rpc(serde_json::Value),

    /// The session closed while the call was still pending
    #[error("Connection closed")]
    ConnectionClosed,

    /// A deadline elapsed while waiting on the gateway
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Missing or invalid request parameter
    #[error("{0}")]
    Validation(String),

    /// Bad or missing bridge credential
    #[error("unauthorized")]
    Unauthorized,

    /// The bridge answered with a non-success status
    #[error("proxy {status}: {body}")]
    Upstream { status: u16, body: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Unauthorized)
    }

    /// Check if error originated from the gateway side of the bridge
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Protocol(_)
                | Error::Auth(_)
                | Error::Rpc(_)
                | Error::ConnectionClosed
                | Error::Timeout(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
