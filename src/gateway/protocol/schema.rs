//! Gateway protocol schema
//!
//! Defines the wire format for gateway messages: one JSON object per WebSocket
//! text frame, discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Protocol version negotiated in the connect request
pub const PROTOCOL_VERSION: u32 = 3;

/// Gateway frame - Top-level message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    /// Request (client to gateway)
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Response to a request, correlated by id
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Event pushed by the gateway
    #[serde(rename = "event")]
    Event(EventFrame),
}

/// Request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    /// Correlation id, unique per outstanding request on a connection
    pub id: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default)]
    pub params: Value,
}

/// Response frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    /// Id of the request this responds to
    pub id: String,
    /// Whether the request succeeded
    pub ok: bool,
    /// Result payload (success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error payload (failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Event frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Event name
    pub event: String,
    /// Event data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Gateway sequence number, kept as sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Value>,
    /// Gateway state version, forwarded untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<Value>,
    /// Fields this bridge does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Wire text the frame was decoded from
    #[serde(skip)]
    pub raw: Option<String>,
}

/// An inbound text frame that could not be decoded.
///
/// Never fatal: callers log and drop the frame.
#[derive(Debug, Error)]
#[error("unparseable frame: {0}")]
pub struct ParseFailure(pub String);

/// Serialize a frame to its wire text form
pub fn encode(frame: &GatewayFrame) -> crate::Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse inbound wire text into a frame
pub fn decode(text: &str) -> Result<GatewayFrame, ParseFailure> {
    let mut frame: GatewayFrame =
        serde_json::from_str(text).map_err(|e| ParseFailure(e.to_string()))?;
    if let GatewayFrame::Event(event) = &mut frame {
        event.raw = Some(text.to_string());
    }
    Ok(frame)
}

impl RequestFrame {
    /// Create a new request
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        RequestFrame {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl ResponseFrame {
    /// Create a success response
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        ResponseFrame {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create an error response
    pub fn failure(id: impl Into<String>, error: Value) -> Self {
        ResponseFrame {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Upstream error payload, falling back to a generic message when the
    /// gateway sent `ok: false` without one
    pub fn error_value(&self) -> Value {
        self.error
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "message": "RPC error" }))
    }

    /// Convert into the call outcome: the payload (or `null`) on success, the
    /// upstream error otherwise
    pub fn into_result(self) -> crate::Result<Value> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(crate::Error::Rpc(self.error_value()))
        }
    }
}

impl EventFrame {
    /// Create a new event
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        EventFrame {
            event: event.into(),
            payload: Some(payload),
            seq: None,
            state_version: None,
            extra: Map::new(),
            raw: None,
        }
    }

    /// Set the sequence number
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(Value::from(seq));
        self
    }

    /// Text to forward downstream: the received frame unchanged, or a fresh
    /// encoding for frames built locally
    pub fn wire_text(&self) -> crate::Result<String> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => encode(&GatewayFrame::Event(self.clone())),
        }
    }
}

/// Best-effort human message from an upstream error payload
pub fn error_message(error: &Value) -> String {
    match error.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => error.to_string(),
    }
}
