// One live connection: a receive loop and a transmit loop joined by a
// per-session cancellation token.
//
// The receive loop owns the inbound half: rate limiting, validation,
// and forwarding to the hub. The transmit loop owns the outbound half:
// draining the bounded buffer, keepalive pings, and the best-effort
// close frame. Every fatal condition routes through Hub::unregister;
// malformed input only ever produces a per-client notice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::body::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use palaver_common::protocol::ws::{parse_frame, ErrorNotice};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;

use super::hub::{HubHandle, SessionId};

/// One entry in a session's bounded outbound buffer.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A broadcast frame, pre-encoded once by the hub.
    Frame(Arc<str>),
    /// A per-client error notice. Never broadcast.
    Notice(String),
    /// Pong echo for a client-initiated ping.
    Pong(Bytes),
}

/// Fixed-window inbound rate limiter. The window resets exactly once
/// per elapsed boundary; counters belong to one session's receive loop
/// and need no synchronization.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    count: u32,
    window_start: Instant,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration, now: Instant) -> Self {
        Self { limit, window, count: 0, window_start: now }
    }

    /// Admit or suppress one frame observed at `now`.
    pub fn allow(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }

        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

pub(crate) struct SessionParams {
    pub id: SessionId,
    pub hub: HubHandle,
    pub cancel: CancellationToken,
    pub limiter: FixedWindowLimiter,
    pub read_deadline: Duration,
    pub keepalive_interval: Duration,
}

/// Drive both loops for an already-registered session. Returns when the
/// session is finished; unregistration has happened by then.
pub(crate) async fn run_session(
    socket: WebSocket,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: mpsc::Receiver<Outbound>,
    params: SessionParams,
) {
    let (sink, stream) = socket.split();

    let transmit = tokio::spawn(transmit_loop(
        sink,
        outbound_rx,
        params.cancel.clone(),
        params.keepalive_interval,
    ));

    receive_loop(stream, outbound_tx, params).await;

    let _ = transmit.await;
}

async fn receive_loop(
    mut stream: SplitStream<WebSocket>,
    outbound: mpsc::Sender<Outbound>,
    mut params: SessionParams,
) {
    loop {
        let next = tokio::select! {
            _ = params.cancel.cancelled() => break,
            next = tokio::time::timeout(params.read_deadline, stream.next()) => next,
        };

        // Any inbound traffic, pongs included, restarts the deadline:
        // the timeout wraps each individual read.
        let message = match next {
            Err(_elapsed) => {
                metrics::record_deadline_reclaim();
                warn!(session_id = %params.id, "read deadline expired, reclaiming half-open session");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(error))) => {
                debug!(session_id = %params.id, %error, "transport read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(raw) => {
                handle_inbound_frame(raw.as_bytes(), &outbound, &mut params).await;
            }
            Message::Binary(raw) => {
                handle_inbound_frame(&raw, &outbound, &mut params).await;
            }
            Message::Ping(payload) => {
                // Echoed from the transmit side; best-effort like notices.
                let _ = outbound.try_send(Outbound::Pong(payload));
            }
            Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    // Sole exit: transport close/error, deadline expiry, or cancellation.
    // Unregister is idempotent, so racing a hub-initiated removal is fine.
    params.hub.unregister(params.id).await;
}

async fn handle_inbound_frame(
    raw: &[u8],
    outbound: &mpsc::Sender<Outbound>,
    params: &mut SessionParams,
) {
    if !params.limiter.allow(Instant::now()) {
        metrics::record_rate_limited();
        debug!(session_id = %params.id, "inbound frame suppressed by rate limit");
        send_notice(outbound, &ErrorNotice::rate_limited(params.limiter.limit()));
        return;
    }

    match parse_frame(raw) {
        Ok(_frame) => {
            // Validated JSON is always UTF-8. The hub re-validates; the
            // validator is stateless and cheap.
            if let Ok(text) = std::str::from_utf8(raw) {
                params.hub.broadcast(text.to_string()).await;
            }
        }
        Err(error) => {
            metrics::record_invalid_frame();
            debug!(session_id = %params.id, %error, "rejecting malformed inbound frame");
            send_notice(outbound, &ErrorNotice::invalid_format(&error));
        }
    }
}

fn send_notice(outbound: &mpsc::Sender<Outbound>, notice: &ErrorNotice) {
    // Best-effort: a full buffer here is already evidence the consumer
    // is stalling, and hub fan-out will disconnect it.
    if let Ok(encoded) = notice.encode() {
        let _ = outbound.try_send(Outbound::Notice(encoded));
    }
}

async fn transmit_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    keepalive_interval: Duration,
) {
    let mut ping_interval = tokio::time::interval(keepalive_interval);
    ping_interval.reset(); // skip immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound.recv() => {
                let Some(item) = maybe_outbound else {
                    break;
                };
                let message = match item {
                    Outbound::Frame(text) => Message::Text(text.as_ref().to_owned().into()),
                    Outbound::Notice(text) => Message::Text(text.into()),
                    Outbound::Pong(payload) => Message::Pong(payload),
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        }
    }

    // Best-effort graceful close before the transport is torn down.
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "closing".into(),
        })))
        .await;
}
