//! In-process gateway double for tests.
//!
//! Speaks the real wire protocol over a loopback WebSocket: sends
//! `connect.challenge`, answers `connect`, then replies to RPCs through a
//! scripted responder.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{
    decode, encode, events, methods, EventFrame, GatewayFrame, ResponseFrame,
};

/// Scripted answer to one RPC
pub(crate) enum Reply {
    Ok(Value),
    Err(Value),
    Delayed(Duration, Box<Reply>),
    GarbageThen(Box<Reply>),
    Twice(Value),
    Silent,
}

type Responder = dyn Fn(&str, &Value) -> Reply + Send + Sync;

#[derive(Clone)]
enum Control {
    Frame(String),
    Disconnect,
}

#[derive(Clone, Default)]
struct Options {
    skip_challenge: bool,
    reject_connect: Option<Value>,
}

#[derive(Default)]
struct Recorded {
    accepted: AtomicUsize,
    open: AtomicUsize,
    connects: Mutex<Vec<Value>>,
    requests: Mutex<Vec<(String, Value)>>,
}

pub(crate) struct MockGatewayBuilder {
    options: Options,
}

impl MockGatewayBuilder {
    /// Close the socket instead of sending `connect.challenge`
    pub(crate) fn skip_challenge(mut self) -> Self {
        self.options.skip_challenge = true;
        self
    }

    /// Answer `connect` with `ok: false` and this error
    pub(crate) fn reject_connect(mut self, error: Value) -> Self {
        self.options.reject_connect = Some(error);
        self
    }

    pub(crate) async fn start<F>(self, responder: F) -> MockGateway
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Recorded::default());
        let (control, _) = broadcast::channel(64);
        let responder: Arc<Responder> = Arc::new(responder);

        let task = {
            let recorded = recorded.clone();
            let control = control.clone();
            let options = self.options;
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve_connection(
                        stream,
                        options.clone(),
                        responder.clone(),
                        recorded.clone(),
                        control.subscribe(),
                    ));
                }
            })
        };

        MockGateway {
            addr,
            recorded,
            control,
            task,
        }
    }
}

pub(crate) struct MockGateway {
    addr: SocketAddr,
    recorded: Arc<Recorded>,
    control: broadcast::Sender<Control>,
    task: JoinHandle<()>,
}

impl MockGateway {
    pub(crate) fn builder() -> MockGatewayBuilder {
        MockGatewayBuilder {
            options: Options::default(),
        }
    }

    pub(crate) async fn start<F>(responder: F) -> MockGateway
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        Self::builder().start(responder).await
    }

    pub(crate) fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// WebSocket connections accepted so far
    pub(crate) fn connection_count(&self) -> usize {
        self.recorded.accepted.load(Ordering::SeqCst)
    }

    /// Connections not yet closed
    pub(crate) fn open_connections(&self) -> usize {
        self.recorded.open.load(Ordering::SeqCst)
    }

    /// Params of every `connect` request received
    pub(crate) fn connect_requests(&self) -> Vec<Value> {
        self.recorded.connects.lock().unwrap().clone()
    }

    /// Every non-connect request received, as `(method, params)`
    pub(crate) fn requests(&self) -> Vec<(String, Value)> {
        self.recorded.requests.lock().unwrap().clone()
    }

    /// Push an event to every open connection
    pub(crate) fn emit(&self, event: EventFrame) {
        let text = encode(&GatewayFrame::Event(event)).unwrap();
        let _ = self.control.send(Control::Frame(text));
    }

    /// Push a frame exactly as written to every open connection
    pub(crate) fn emit_raw(&self, text: &str) {
        let _ = self.control.send(Control::Frame(text.to_string()));
    }

    /// Close every open connection from the gateway side
    pub(crate) fn disconnect_all(&self) {
        let _ = self.control.send(Control::Disconnect);
    }

    /// Poll until the number of open connections drops to `n`
    pub(crate) async fn wait_for_open_connections(&self, n: usize) -> bool {
        for _ in 0..200 {
            if self.open_connections() == n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    stream: TcpStream,
    options: Options,
    responder: Arc<Responder>,
    recorded: Arc<Recorded>,
    mut control: broadcast::Receiver<Control>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    recorded.accepted.fetch_add(1, Ordering::SeqCst);
    recorded.open.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut source) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    if options.skip_challenge {
        let _ = sink.send(Message::Close(None)).await;
        recorded.open.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    let challenge = EventFrame::new(
        events::CONNECT_CHALLENGE,
        json!({"nonce": "test-nonce", "ts": 1700000000000u64}),
    );
    let _ = sink
        .send(Message::text(encode(&GatewayFrame::Event(challenge)).unwrap()))
        .await;

    loop {
        tokio::select! {
            Some(msg) = out_rx.recv() => {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            ctl = control.recv() => match ctl {
                Ok(Control::Frame(text)) => {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Disconnect) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_request(text.as_str(), &options, &responder, &recorded, &out_tx);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    recorded.open.fetch_sub(1, Ordering::SeqCst);
}

fn handle_request(
    text: &str,
    options: &Options,
    responder: &Arc<Responder>,
    recorded: &Recorded,
    out: &mpsc::UnboundedSender<Message>,
) {
    let Ok(GatewayFrame::Request(req)) = decode(text) else {
        return;
    };

    if req.method == methods::CONNECT {
        recorded.connects.lock().unwrap().push(req.params.clone());
        let res = match &options.reject_connect {
            Some(error) => ResponseFrame::failure(req.id, error.clone()),
            None => ResponseFrame::success(req.id, json!({"type": "hello-ok", "protocol": 3})),
        };
        let _ = out.send(response(res));
        return;
    }

    recorded
        .requests
        .lock()
        .unwrap()
        .push((req.method.clone(), req.params.clone()));
    let reply = responder(&req.method, &req.params);
    tokio::spawn(deliver(reply, req.id, out.clone()));
}

fn response(res: ResponseFrame) -> Message {
    Message::text(encode(&GatewayFrame::Response(res)).unwrap())
}

async fn deliver(mut reply: Reply, id: String, out: mpsc::UnboundedSender<Message>) {
    loop {
        match reply {
            Reply::Delayed(delay, next) => {
                tokio::time::sleep(delay).await;
                reply = *next;
            }
            Reply::GarbageThen(next) => {
                let _ = out.send(Message::text("{this is not json"));
                reply = *next;
            }
            Reply::Ok(payload) => {
                let _ = out.send(response(ResponseFrame::success(id, payload)));
                return;
            }
            Reply::Err(error) => {
                let _ = out.send(response(ResponseFrame::failure(id, error)));
                return;
            }
            Reply::Twice(payload) => {
                let _ = out.send(response(ResponseFrame::success(id.clone(), payload.clone())));
                let _ = out.send(response(ResponseFrame::success(id, json!("duplicate"))));
                return;
            }
            Reply::Silent => return,
        }
    }
}
