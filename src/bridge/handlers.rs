//! Request/response endpoints
//!
//! Each handler opens its own gateway session; the session closes when the
//! client is dropped at the end of the handler, on success and on error.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use super::BridgeState;
use crate::agents::{derive_agents, AgentList};
use crate::error::Error;
use crate::gateway::protocol::error_message;

/// Page size for `sessions.list` and `chat.history`
pub const LIST_LIMIT: u32 = 200;

// ---- Error Handling ----

/// Library error rendered as a JSON HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    fn detail(&self) -> String {
        match &self.0 {
            Error::Rpc(error) => error_message(error),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Validation(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            Error::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" })),
            _ => {
                let detail = self.detail();
                if self.0.is_upstream_error() {
                    warn!("Gateway request failed: {}", detail);
                } else {
                    error!("Request failed: {}", detail);
                }
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "server_error", "detail": detail }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

// ---- Query Params ----

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    #[serde(rename = "sessionKey")]
    session_key: Option<String>,
}

/// Non-empty string field of a JSON body
fn required_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

// ---- Handlers ----

pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub(crate) async fn sessions(
    State(state): State<Arc<BridgeState>>,
) -> Result<Json<Value>, ApiError> {
    let client = state.connector.connect().await?;
    let payload = client.list_sessions(LIST_LIMIT).await?;
    Ok(Json(payload))
}

pub(crate) async fn history(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let session_key = query
        .session_key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Validation("missing sessionKey".to_string()))?;

    let client = state.connector.connect().await?;
    let payload = client.get_history(&session_key, LIST_LIMIT).await?;
    Ok(Json(payload))
}

pub(crate) async fn nudge(
    State(state): State<Arc<BridgeState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let (Some(session_key), Some(message)) = (
        required_str(&body, "sessionKey"),
        required_str(&body, "message"),
    ) else {
        return Err(Error::Validation("missing sessionKey/message".to_string()).into());
    };

    let client = state.connector.connect().await?;
    let payload = client.send_nudge(session_key, message).await?;
    Ok(Json(payload))
}

pub(crate) async fn agents(
    State(state): State<Arc<BridgeState>>,
) -> Result<Json<AgentList>, ApiError> {
    let client = state.connector.connect().await?;
    let payload = client.list_sessions(LIST_LIMIT).await?;
    Ok(Json(derive_agents(&payload)))
}

pub(crate) async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response()
}
