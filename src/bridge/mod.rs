//! HTTP bridge - stateless HTTP/SSE surface over the gateway's RPC protocol
//!
//! | Route | Auth | Gateway interaction |
//! |-------|------|---------------------|
//! | `GET /health` | none | none |
//! | `GET /sessions` | token | `sessions.list` |
//! | `GET /history?sessionKey=K` | token | `chat.history` |
//! | `POST /nudge` | token | nudge method |
//! | `GET /agents` | token | `sessions.list`, agent ids derived |
//! | `GET /events` | token | event relay over SSE |

pub mod auth;
pub mod events;
mod handlers;

pub use handlers::{ApiError, LIST_LIMIT};

use axum::{
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::SecretString;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::Config;
use crate::gateway::GatewayConnector;

/// Shared, read-only state for every request
pub struct BridgeState {
    connector: GatewayConnector,
    proxy_token: SecretString,
    ping_interval: Duration,
}

impl BridgeState {
    pub fn new(connector: GatewayConnector, proxy_token: SecretString, ping_interval: Duration) -> Self {
        BridgeState {
            connector,
            proxy_token,
            ping_interval,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            GatewayConnector::from_config(&config.gateway),
            config.server.proxy_token.clone(),
            config.server.ping_interval,
        )
    }
}

/// Build the bridge router
pub fn router(state: Arc<BridgeState>) -> Router {
    let protected = Router::new()
        .route("/sessions", get(handlers::sessions))
        .route("/history", get(handlers::history))
        .route("/nudge", post(handlers::nudge))
        .route("/agents", get(handlers::agents))
        .route("/events", get(events::events))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_token));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state);

    with_middleware(app)
}

/// Panic recovery, response headers, tracing and CORS
fn with_middleware(app: Router) -> Router {
    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    error!("Request handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "server_error", "detail": detail })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{MockGateway, Reply};
    use crate::gateway::{ClientInfo, ConnectAuth, ConnectParams, EventFrame};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "proxy-secret";

    fn state_for(url: String, ping: Duration) -> Arc<BridgeState> {
        let params = ConnectParams::operator(
            ClientInfo::default(),
            ConnectAuth {
                token: Some("gw-token".to_string()),
                password: None,
            },
        );
        let connector = GatewayConnector::new(url, params).with_timeout(Some(Duration::from_secs(5)));
        Arc::new(BridgeState::new(
            connector,
            SecretString::from(SECRET.to_string()),
            ping,
        ))
    }

    fn app(gateway: &MockGateway) -> Router {
        router(state_for(gateway.url(), Duration::from_secs(15)))
    }

    fn authed_get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-proxy-token", SECRET)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-proxy-token", SECRET)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    fn sessions_gateway_responder(method: &str, _params: &Value) -> Reply {
        match method {
            "sessions.list" => Reply::Ok(json!({
                "sessions": [{"sessionKey": "agent:friday:main", "updatedAt": 1700000000000u64}]
            })),
            _ => Reply::Err(json!({"message": format!("unexpected {}", method)})),
        }
    }

    #[tokio::test]
    async fn test_health_needs_no_auth_or_gateway() {
        let gateway = MockGateway::start(|_, _| Reply::Ok(json!({}))).await;
        let response = app(&gateway)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(body_json(response).await, json!({"ok": true}));
        assert_eq!(gateway.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_end_to_end() {
        let gateway = MockGateway::start(sessions_gateway_responder).await;
        let response = app(&gateway).oneshot(authed_get("/sessions")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            r#"{"sessions":[{"sessionKey":"agent:friday:main","updatedAt":1700000000000}]}"#
        );

        let connects = gateway.connect_requests();
        assert_eq!(connects.len(), 1);
        assert_eq!(connects[0]["role"], json!("operator"));
        assert_eq!(gateway.requests(), vec![("sessions.list".to_string(), json!({"limit": 200}))]);
        assert!(gateway.wait_for_open_connections(0).await);
    }

    #[tokio::test]
    async fn test_rejected_connect_is_server_error_with_detail() {
        let gateway = MockGateway::builder()
            .reject_connect(json!({"message": "bad token"}))
            .start(sessions_gateway_responder)
            .await;
        let response = app(&gateway).oneshot(authed_get("/sessions")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], json!("server_error"));
        assert!(body["detail"].as_str().unwrap().contains("bad token"));
    }

    #[tokio::test]
    async fn test_rpc_failure_detail_is_upstream_message() {
        let gateway =
            MockGateway::start(|_, _| Reply::Err(json!({"message": "session not found"}))).await;
        let response = app(&gateway)
            .oneshot(authed_get("/history?sessionKey=agent%3Aghost%3Amain"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "server_error", "detail": "session not found"})
        );
    }

    #[tokio::test]
    async fn test_unauthorized_requests_never_reach_gateway() {
        let gateway = MockGateway::start(sessions_gateway_responder).await;
        let app = app(&gateway);

        let missing = Request::builder().uri("/sessions").body(Body::empty()).unwrap();
        let wrong_bearer = Request::builder()
            .uri("/sessions")
            .header("authorization", "Bearer not-the-secret")
            .body(Body::empty())
            .unwrap();
        let prefix = Request::builder()
            .uri("/events")
            .header("x-proxy-token", "proxy-sec")
            .body(Body::empty())
            .unwrap();

        for request in [missing, wrong_bearer, prefix] {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(response).await, json!({"error": "unauthorized"}));
        }
        assert_eq!(gateway.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_proxy_token_accepted_with_garbled_authorization() {
        let gateway = MockGateway::start(sessions_gateway_responder).await;
        let request = Request::builder()
            .uri("/sessions")
            .header("x-proxy-token", SECRET)
            .header("authorization", "Basic Zm9vOmJhcg== garbage")
            .body(Body::empty())
            .unwrap();

        let response = app(&gateway).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let gateway = MockGateway::start(sessions_gateway_responder).await;
        let request = Request::builder()
            .uri("/sessions")
            .header("authorization", format!("bearer {}", SECRET))
            .body(Body::empty())
            .unwrap();

        let response = app(&gateway).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_history_requires_session_key() {
        let gateway = MockGateway::start(|_, _| Reply::Ok(json!({}))).await;
        let app = app(&gateway);

        for uri in ["/history", "/history?sessionKey="] {
            let response = app.clone().oneshot(authed_get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await, json!({"error": "missing sessionKey"}));
        }
        assert_eq!(gateway.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_history_forwards_session_key() {
        let gateway = MockGateway::start(|_, params| Reply::Ok(json!({"echo": params}))).await;
        let response = app(&gateway)
            .oneshot(authed_get("/history?sessionKey=agent%3Afriday%3Amain"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"echo": {"sessionKey": "agent:friday:main", "limit": 200}})
        );
    }

    #[tokio::test]
    async fn test_nudge_validation_and_forwarding() {
        let gateway = MockGateway::start(|_, _| Reply::Ok(json!({"status": "queued"}))).await;
        let app = app(&gateway);

        for body in [
            json!({"sessionKey": "agent:friday:main"}),
            json!({"sessionKey": "", "message": "hi"}),
            json!({"message": "hi"}),
            json!("not an object"),
        ] {
            let response = app.clone().oneshot(post_json("/nudge", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                body_json(response).await,
                json!({"error": "missing sessionKey/message"})
            );
        }
        assert_eq!(gateway.connection_count(), 0);

        let response = app
            .oneshot(post_json(
                "/nudge",
                json!({"sessionKey": "agent:friday:main", "message": "status?"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "queued"}));
        assert_eq!(
            gateway.requests(),
            vec![(
                "chat.send".to_string(),
                json!({"sessionKey": "agent:friday:main", "message": "status?"})
            )]
        );
    }

    #[tokio::test]
    async fn test_agents_derived_from_sessions() {
        let gateway = MockGateway::start(|_, _| {
            Reply::Ok(json!({"sessions": [
                {"sessionKey": "agent:friday:main"},
                {"sessionKey": "agent:atlas:cron"},
                {"sessionKey": "agent:friday:side"}
            ]}))
        })
        .await;

        let response = app(&gateway).oneshot(authed_get("/agents")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"agents": [
                {"agentId": "atlas", "name": "atlas"},
                {"agentId": "friday", "name": "friday"}
            ]})
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let gateway = MockGateway::start(|_, _| Reply::Ok(json!({}))).await;
        let response = app(&gateway).oneshot(authed_get("/nope")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "not_found"}));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_server_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let response = router(state_for(url, Duration::from_secs(15)))
            .oneshot(authed_get("/sessions"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], json!("server_error"));
    }

    #[tokio::test]
    async fn test_panic_becomes_server_error() {
        async fn boom() -> &'static str {
            panic!("kaboom")
        }
        let app = with_middleware(Router::new().route("/boom", get(boom)));

        let response = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "server_error", "detail": "kaboom"})
        );
    }

    #[tokio::test]
    async fn test_events_relay_and_teardown() {
        let gateway = MockGateway::start(|_, _| Reply::Ok(json!({}))).await;
        let app = router(state_for(gateway.url(), Duration::from_millis(100)));

        let response = app.oneshot(authed_get("/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        assert!(response.headers().get(header::CONNECTION).is_none());

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(std::str::from_utf8(&first).unwrap(), "event: ready\ndata: {}\n\n");

        // Poll in the background so the relay subscribes while events are emitted.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(Ok(chunk)) = body.next().await {
                if tx.send(String::from_utf8_lossy(&chunk).to_string()).is_err() {
                    break;
                }
            }
        });

        let mut seen = String::new();
        for _ in 0..50 {
            gateway.emit(EventFrame::new("chat", json!({"text": "hi"})).with_seq(7));
            if let Ok(Some(chunk)) =
                tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
            {
                seen.push_str(&chunk);
            }
            if seen.contains("event: gw") {
                break;
            }
        }
        assert!(seen.contains("event: gw\ndata: {"), "got {:?}", seen);
        assert!(seen.contains(r#""event":"chat""#));
        assert!(seen.contains(r#""seq":7"#));

        while !seen.contains("event: ping") {
            let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push_str(&chunk);
        }
        assert!(seen.contains("event: ping\ndata: {}\n\n"));

        // Client disconnect: dropping the body tears down the gateway session.
        reader.abort();
        let _ = reader.await;
        assert!(gateway.wait_for_open_connections(0).await);
        assert_eq!(gateway.connection_count(), 1);
    }

    /// Forward body chunks of an SSE response over a channel until the body ends
    fn spawn_reader(
        response: axum::response::Response,
    ) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        let mut body = response.into_body().into_data_stream();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(Ok(chunk)) = body.next().await {
                if tx.send(String::from_utf8_lossy(&chunk).to_string()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    #[tokio::test]
    async fn test_events_forward_frame_text_verbatim() {
        let raw = r#"{"type":"event","event":"chat","payload":null,"seq":1.0,"zeta":1,"alpha":{"b":1,"a":2}}"#;
        let gateway = MockGateway::start(|_, _| Reply::Ok(json!({}))).await;
        let response = router(state_for(gateway.url(), Duration::from_secs(15)))
            .oneshot(authed_get("/events"))
            .await
            .unwrap();
        let mut rx = spawn_reader(response);

        let mut seen = String::new();
        for _ in 0..50 {
            gateway.emit_raw(raw);
            if let Ok(Some(chunk)) =
                tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
            {
                seen.push_str(&chunk);
            }
            if seen.contains("event: gw") {
                break;
            }
        }
        assert!(
            seen.contains(&format!("event: gw\ndata: {}\n\n", raw)),
            "got {:?}",
            seen
        );
    }

    #[tokio::test]
    async fn test_events_stream_ends_when_gateway_disconnects() {
        let gateway = MockGateway::start(|_, _| Reply::Ok(json!({}))).await;
        let response = router(state_for(gateway.url(), Duration::from_millis(50)))
            .oneshot(authed_get("/events"))
            .await
            .unwrap();
        let mut rx = spawn_reader(response);

        let first = rx.recv().await.unwrap();
        assert_eq!(first, "event: ready\ndata: {}\n\n");
        assert!(gateway.wait_for_open_connections(1).await);

        gateway.disconnect_all();

        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(ended.is_ok(), "event stream kept running after gateway disconnect");
        assert!(gateway.wait_for_open_connections(0).await);
    }

    #[tokio::test]
    async fn test_events_stream_ends_when_gateway_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let response = router(state_for(url, Duration::from_secs(15)))
            .oneshot(authed_get("/events"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "event: ready\ndata: {}\n\n");
    }
}
