//! `GET /events` - Server-Sent Events relay of raw gateway events
//!
//! The stream writes `ready` immediately, then opens one gateway session and
//! forwards every event frame verbatim as a `gw` event, with a `ping` on each
//! keep-alive tick. Dropping the stream (client disconnect) drops the relay,
//! which unsubscribes, stops the ticker and closes the session.

use axum::{
    extract::State,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::BridgeState;
use crate::gateway::{EventFrame, GatewayClient, GatewayConnector, Subscription};

/// SSE event names
pub const READY_EVENT: &str = "ready";
pub const GATEWAY_EVENT: &str = "gw";
pub const PING_EVENT: &str = "ping";

pub(crate) async fn events(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    Sse::new(relay(state.connector.clone(), state.ping_interval))
}

/// Build the SSE event stream for one client
pub fn relay(
    connector: GatewayConnector,
    ping_interval: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let ready = stream::once(async { Ok(Event::default().event(READY_EVENT).data("{}")) });
    let forwarded = stream::unfold(
        RelayState::Pending {
            connector,
            ping_interval,
        },
        next_event,
    );
    ready.chain(forwarded)
}

enum RelayState {
    Pending {
        connector: GatewayConnector,
        ping_interval: Duration,
    },
    Live(Relay),
}

/// Resources held for the lifetime of one event stream
struct Relay {
    client: GatewayClient,
    events: Subscription,
    ticker: Interval,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.events.unsubscribe();
        self.client.close();
        info!("Event relay closed");
    }
}

enum Step {
    Frame(Option<EventFrame>),
    Ping,
}

async fn next_event(state: RelayState) -> Option<(Result<Event, Infallible>, RelayState)> {
    let mut relay = match state {
        RelayState::Pending {
            connector,
            ping_interval,
        } => match connector.connect().await {
            Ok(client) => {
                let events = client.subscribe();
                let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!("Event relay open");
                Relay {
                    client,
                    events,
                    ticker,
                }
            }
            Err(e) => {
                warn!("Event relay could not open gateway session: {}", e);
                return None;
            }
        },
        RelayState::Live(relay) => relay,
    };

    loop {
        let step = tokio::select! {
            frame = relay.events.recv() => Step::Frame(frame),
            _ = relay.ticker.tick() => Step::Ping,
        };

        match step {
            Step::Frame(Some(frame)) => match frame.wire_text() {
                Ok(data) => {
                    let event = Event::default().event(GATEWAY_EVENT).data(data);
                    return Some((Ok(event), RelayState::Live(relay)));
                }
                Err(e) => debug!("Skipping unencodable event: {}", e),
            },
            Step::Frame(None) => {
                debug!("Gateway session ended, closing event stream");
                return None;
            }
            Step::Ping => {
                let event = Event::default().event(PING_EVENT).data("{}");
                return Some((Ok(event), RelayState::Live(relay)));
            }
        }
    }
}
