//! Configuration management for the bridge
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

/// Default upstream gateway endpoint
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:52764";

/// Default method used to inject operator nudges
pub const DEFAULT_NUDGE_METHOD: &str = "chat.send";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(Error::Config(format!(
                "Invalid log format: {}. Valid options: pretty, json",
                s
            ))),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
    /// Listening port
    pub port: u16,
    /// Shared secret every protected route must present
    pub proxy_token: SecretString,
    /// Keep-alive interval for the event stream
    pub ping_interval: Duration,
}

/// Upstream gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway
    pub url: String,
    /// Gateway token credential
    pub token: Option<SecretString>,
    /// Gateway password credential
    pub password: Option<SecretString>,
    /// Deadline applied to the handshake and to each RPC (`None` waits forever)
    pub timeout: Option<Duration>,
    /// Method name for operator nudges
    pub nudge_method: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,
    /// Gateway settings
    pub gateway: GatewayConfig,
    /// Logging settings
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let proxy_token = var("PROXY_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| Error::Config("PROXY_TOKEN is required".to_string()))?;

        let config = Config {
            server: ServerConfig {
                bind: var("BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_number("PORT", var("PORT"), 8787)?,
                proxy_token,
                ping_interval: Duration::from_secs(parse_number(
                    "SSE_PING_SECS",
                    var("SSE_PING_SECS"),
                    15,
                )?),
            },
            gateway: GatewayConfig {
                url: var("GATEWAY_WS_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
                token: var("GATEWAY_TOKEN").map(SecretString::from),
                password: var("GATEWAY_PASSWORD").map(SecretString::from),
                timeout: match parse_number::<u64>(
                    "GATEWAY_TIMEOUT_SECS",
                    var("GATEWAY_TIMEOUT_SECS"),
                    30,
                )? {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
                nudge_method: var("GATEWAY_NUDGE_METHOD")
                    .unwrap_or_else(|| DEFAULT_NUDGE_METHOD.to_string()),
            },
            log: LogConfig {
                level: var("RUST_LOG").unwrap_or_else(|| "info,agentops_bridge=debug".to_string()),
                format: var("LOG_FORMAT")
                    .map(|f| f.parse::<LogFormat>())
                    .transpose()?
                    .unwrap_or_default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate that all required configuration is present and well-formed
    pub fn validate(&self) -> Result<()> {
        if self.server.proxy_token.expose_secret().is_empty() {
            return Err(Error::Config("PROXY_TOKEN is required".to_string()));
        }
        if self.server.ping_interval.is_zero() {
            return Err(Error::Config("SSE_PING_SECS must be greater than zero".to_string()));
        }

        let url = Url::parse(&self.gateway.url).map_err(|e| {
            Error::Config(format!("Invalid GATEWAY_WS_URL {}: {}", self.gateway.url, e))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "GATEWAY_WS_URL must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} must be a number, got {:?}", key, v))),
        None => Ok(default),
    }
}
