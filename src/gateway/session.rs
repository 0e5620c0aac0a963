//! Gateway session - one authenticated WebSocket connection
//!
//! A session performs the challenge handshake, then hands the socket to a
//! background I/O task. The task resolves pending calls by correlation id and
//! fans event frames out to subscribers until the transport closes.
//!
//! ```text
//!   Connecting ──► AwaitingChallenge ──► Authenticating ──► Open ──► Closed
//!        │                 │                    │
//!        └─ Transport      └─ Protocol          └─ Auth / Protocol
//! ```
//!
//! Dropping a [`GatewaySession`] closes it.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::protocol::{
    decode, encode, events, methods, ConnectParams, EventFrame, GatewayFrame, RequestFrame,
};
use crate::error::{Error, Result};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the transport
    Connecting,
    /// Waiting for `connect.challenge`
    AwaitingChallenge,
    /// Connect request sent, waiting for its response
    Authenticating,
    /// Handshake complete; calls and events flow
    Open,
    /// Transport closed; terminal
    Closed,
}

type Outcome = Result<Value>;

/// Events buffered per subscriber; a subscriber that falls this far behind is dropped
pub const SUBSCRIBER_BUFFER: usize = 256;

enum Outbound {
    Frame(String),
    Close,
}

/// State shared between the session handle and its I/O task
struct Shared {
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<EventFrame>>>,
    next_subscriber: AtomicU64,
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: Mutex::new(SessionState::Connecting),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    /// Route one inbound text frame of an open session
    fn dispatch(&self, text: &str) {
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Discarding gateway frame: {}", e);
                return;
            }
        };

        match frame {
            GatewayFrame::Response(res) => {
                let waiter = lock(&self.pending).remove(&res.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(res.into_result());
                    }
                    None => debug!("Ignoring response for unknown id {}", res.id),
                }
            }
            GatewayFrame::Event(event) => {
                debug!(event = %event.event, seq = ?event.seq, "gateway event");
                lock(&self.subscribers).retain(|id, tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscriber = id, "Subscriber fell behind, dropping it");
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
            GatewayFrame::Request(req) => {
                debug!("Ignoring gateway-initiated request {}", req.method);
            }
        }
    }

    /// Enter `Closed`: fail every pending call and drop every subscriber
    fn shutdown(&self) {
        self.set_state(SessionState::Closed);

        let pending: Vec<_> = lock(&self.pending).drain().collect();
        if !pending.is_empty() {
            debug!("Failing {} pending call(s) on close", pending.len());
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        lock(&self.subscribers).clear();
    }
}

/// Generate a correlation id: millisecond timestamp plus a random suffix
pub fn correlation_id() -> String {
    format!(
        "{:x}-{:016x}",
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u64>()
    )
}

/// An authenticated connection to the gateway
pub struct GatewaySession {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl GatewaySession {
    /// Open a WebSocket to `url` and perform the connect handshake.
    ///
    /// No deadline is applied here; wrap the future in a timeout to bound it.
    pub async fn open(url: &str, params: &ConnectParams) -> Result<Self> {
        debug!("Opening gateway session to {}", url);
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("ws open failed: {}", e)))?;
        Self::handshake(ws, params).await
    }

    /// Perform the connect handshake on an already-open WebSocket.
    ///
    /// One transport carries exactly one handshake; the stream is consumed.
    pub async fn handshake<S>(mut ws: WebSocketStream<S>, params: &ConnectParams) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::new());

        shared.set_state(SessionState::AwaitingChallenge);
        let challenge = await_challenge(&mut ws).await?;
        debug!(
            "Received connect.challenge (payload {})",
            if challenge.payload.is_some() { "present" } else { "absent" }
        );

        // The challenge payload is not echoed: device signing is not implemented.
        shared.set_state(SessionState::Authenticating);
        let connect_id = correlation_id();
        let request = GatewayFrame::Request(RequestFrame::new(
            connect_id.clone(),
            methods::CONNECT,
            serde_json::to_value(params)?,
        ));
        ws.send(Message::text(encode(&request)?))
            .await
            .map_err(|e| Error::Transport(format!("failed to send connect: {}", e)))?;

        await_connect_response(&mut ws, &connect_id).await?;

        shared.set_state(SessionState::Open);
        info!(client = %params.client.id, role = %params.role, "Gateway session open");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_io(ws, outbound_rx, shared.clone()));

        Ok(GatewaySession {
            shared,
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether calls can still be issued
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Invoke `method` and wait for its response
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, None).await
    }

    /// Invoke `method`, failing with [`Error::Timeout`] if no response arrives in time.
    ///
    /// A timed-out call is forgotten; a late response for it is ignored.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = correlation_id();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.shared.pending);
            if self.shared.state() != SessionState::Open {
                return Err(Error::ConnectionClosed);
            }
            pending.insert(id.clone(), tx);
        }

        let frame = GatewayFrame::Request(RequestFrame::new(id.clone(), method, params));
        let sent = encode(&frame)
            .and_then(|text| {
                self.outbound
                    .send(Outbound::Frame(text))
                    .map_err(|_| Error::ConnectionClosed)
            });
        if let Err(e) = sent {
            self.forget(&id);
            return Err(e);
        }
        debug!(%id, method, "RPC sent");

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.forget(&id);
                    return Err(Error::Timeout(format!(
                        "{} did not respond within {:?}",
                        method, limit
                    )));
                }
            },
            None => rx.await,
        };

        outcome.unwrap_or(Err(Error::ConnectionClosed))
    }

    fn forget(&self, id: &str) {
        lock(&self.shared.pending).remove(id);
    }

    /// Register a listener for every event frame.
    ///
    /// The subscription ends when it is dropped, when [`Subscription::unsubscribe`]
    /// is called, or when the session closes.
    pub fn subscribe(&self) -> Subscription {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        // Checked under the subscribers lock so a concurrent shutdown cannot miss it
        let mut subscribers = lock(&self.shared.subscribers);
        if self.shared.state() == SessionState::Open {
            subscribers.insert(id, tx);
        }
        drop(subscribers);

        Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).len()
    }

    /// Number of calls awaiting a response
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Close the transport, fail pending calls and clear subscribers. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing gateway session");
            let _ = self.outbound.send(Outbound::Close);
        }
        self.shared.shutdown();
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// A live event subscription on a [`GatewaySession`]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<EventFrame>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Next event, or `None` once unsubscribed, dropped for lagging, or the session has closed
    pub async fn recv(&mut self) -> Option<EventFrame> {
        self.rx.recv().await
    }

    /// Stop receiving events. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.subscribers).remove(&self.id);
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Map a read error during the handshake: a vanished peer is a protocol
/// failure (closed before a milestone), anything else is transport-level.
fn handshake_read_error(err: tungstenite::Error, milestone: &str) -> Error {
    match err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ) => Error::Protocol(format!("closed before {}", milestone)),
        other => Error::Transport(other.to_string()),
    }
}

fn describe_close(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(frame) => format!(" code={} reason={}", u16::from(frame.code), frame.reason.as_str()),
        None => String::new(),
    }
}

/// Read frames until `connect.challenge` arrives; everything else is skipped
async fn await_challenge<S>(ws: &mut WebSocketStream<S>) -> Result<EventFrame>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = ws.next().await {
        match msg.map_err(|e| handshake_read_error(e, "challenge"))? {
            Message::Text(text) => match decode(text.as_str()) {
                Ok(GatewayFrame::Event(event)) if event.event == events::CONNECT_CHALLENGE => {
                    return Ok(event);
                }
                Ok(_) => {}
                Err(e) => debug!("Discarding pre-challenge frame: {}", e),
            },
            Message::Close(frame) => {
                return Err(Error::Protocol(format!(
                    "closed before challenge{}",
                    describe_close(frame)
                )));
            }
            _ => {}
        }
    }
    Err(Error::Protocol("closed before challenge".to_string()))
}

/// Read frames until the response to `connect_id` arrives
async fn await_connect_response<S>(ws: &mut WebSocketStream<S>, connect_id: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = ws.next().await {
        match msg.map_err(|e| handshake_read_error(e, "connect response"))? {
            Message::Text(text) => match decode(text.as_str()) {
                Ok(GatewayFrame::Response(res)) if res.id == connect_id => {
                    if res.ok {
                        return Ok(());
                    }
                    let error = res.error_value();
                    warn!("Gateway rejected connect: {}", error);
                    return Err(Error::Auth(error));
                }
                Ok(_) => {}
                Err(e) => debug!("Discarding handshake frame: {}", e),
            },
            Message::Close(frame) => {
                return Err(Error::Protocol(format!(
                    "closed before connect response{}",
                    describe_close(frame)
                )));
            }
            _ => {}
        }
    }
    Err(Error::Protocol("closed before connect response".to_string()))
}

/// Steady-state I/O loop; ends when the transport closes or the session is closed
async fn run_io<S>(
    ws: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        warn!("Gateway send failed: {}", e);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Gateway closed the connection{}", describe_close(frame));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Gateway connection error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    shared.shutdown();
    debug!("Gateway session I/O task finished");
}
