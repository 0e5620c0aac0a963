//! Gateway Protocol - WebSocket RPC wire format
//!
//! ## Protocol Overview
//!
//! - **JSON-based messages** over WebSocket text frames
//! - **Request-response pattern** correlated by caller-generated ids
//! - **Event streaming** pushed by the gateway
//! - **Challenge handshake**: the gateway opens with `connect.challenge`, the
//!   client answers with a `connect` request
//!
//! ## Message Types
//!
//! - `req`: client-initiated requests
//! - `res`: responses, `ok` plus `payload` or `error`
//! - `event`: gateway-pushed events

pub mod schema;
pub mod types;

pub use schema::{
    decode, encode, error_message, EventFrame, GatewayFrame, ParseFailure, RequestFrame,
    ResponseFrame, PROTOCOL_VERSION,
};
pub use types::*;
