//! Gateway module - WebSocket RPC client side of the bridge
//!
//! ## Architecture
//!
//! ```text
//!   HTTP request ──► GatewayConnector::connect()
//!                          │  ws://… challenge → connect → res
//!                          ▼
//!                    GatewayClient ── call() ──► req ─┐
//!                          │                          │  Gateway
//!                     Subscription ◄── event ◄────────┘
//! ```
//!
//! Every bridge request gets its own session; nothing is shared or reused.

pub mod client;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{GatewayClient, GatewayConnector};
pub use protocol::{
    events, methods, ClientInfo, ConnectAuth, ConnectParams, EventFrame, GatewayFrame,
    ParseFailure, RequestFrame, ResponseFrame, PROTOCOL_VERSION,
};
pub use session::{
    correlation_id, GatewaySession, SessionState, Subscription, SUBSCRIBER_BUFFER,
};
