//! # AgentOps Bridge
//!
//! Operator console backend for an agent gateway. Speaks the gateway's
//! WebSocket RPC protocol and re-exposes it as plain HTTP and Server-Sent Events.
//!
//! ## Features
//!
//! - **Challenge handshake:** authenticated operator sessions over `ws://` or `wss://`
//! - **Multiplexed RPC:** concurrent calls matched to responses by correlation id
//! - **Event relay:** gateway events streamed to browsers over SSE
//! - **Ephemeral sessions:** one gateway session per HTTP request, always torn down
//! - **Operator CLI:** `agentops` talks to a running bridge over HTTP

pub mod agents;
pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod proxy_client;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
