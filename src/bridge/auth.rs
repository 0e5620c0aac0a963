//! Auth gate for the bridge's HTTP surface
//!
//! Operators authenticate with the shared proxy secret, sent either as
//! `x-proxy-token` (preferred, leaves `Authorization` free for edge Basic auth)
//! or as `Authorization: Bearer <secret>`.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::warn;

use super::{ApiError, BridgeState};
use crate::error::Error;

/// Dedicated credential header
pub const PROXY_TOKEN_HEADER: &str = "x-proxy-token";

/// Token from an `Authorization: Bearer <token>` value; the scheme is case-insensitive
pub fn bearer_token(value: &str) -> Option<&str> {
    let scheme = value.get(..6)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let rest = &value[6..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let token = rest.trim_start();
    (!token.is_empty()).then_some(token)
}

/// Check request headers against the proxy secret. Exact match only.
pub fn check_auth(expected: &str, headers: &HeaderMap) -> bool {
    let header_token = headers
        .get(PROXY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if header_token == Some(expected) {
        return true;
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .is_some_and(|token| token == expected)
}

/// Middleware rejecting requests without a valid proxy credential
pub async fn require_token(
    State(state): State<Arc<BridgeState>>,
    request: Request,
    next: Next,
) -> Response {
    if check_auth(state.proxy_token.expose_secret(), request.headers()) {
        return next.run(request).await;
    }

    warn!(
        method = %request.method(),
        path = %request.uri().path(),
        "Rejected request without valid proxy token"
    );
    ApiError(Error::Unauthorized).into_response()
}
