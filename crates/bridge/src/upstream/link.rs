// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extension link: sole owner of the WebSocket to the browser agent.
//!
//! The agent dials in on the extension port. At most one socket is active;
//! a newer connection replaces the older one. While no agent is attached,
//! `send` fails fast with `LinkDown`. The listener itself retries bind
//! failures with exponential backoff (base 500 ms, cap 10 s, ±20% jitter).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::calllog::epoch_ms;
use crate::error::BridgeError;
use crate::frame::{classify, Frame};
use crate::state::BridgeState;
use crate::upstream::dispatch;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Health snapshot, surfaced via `/logs`.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<u64>,
    pub reconnect_count: u64,
}

struct ActiveConn {
    conn_id: u64,
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// Handle to the (at most one) live agent connection.
pub struct ExtensionLink {
    active: Mutex<Option<ActiveConn>>,
    connects: AtomicU64,
    last_seen_ms: AtomicU64,
}

impl ExtensionLink {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            connects: AtomicU64::new(0),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveConn>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue one frame for the agent. Fails fast while the link is down.
    pub fn send(&self, frame: &Value) -> Result<(), BridgeError> {
        let guard = self.lock();
        let Some(conn) = guard.as_ref() else {
            return Err(BridgeError::LinkDown);
        };
        conn.tx.send(frame.to_string()).map_err(|_| BridgeError::LinkDown)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    pub fn status(&self) -> LinkStatus {
        let last_seen = self.last_seen_ms.load(Ordering::Relaxed);
        LinkStatus {
            connected: self.is_connected(),
            last_seen_ms: (last_seen > 0).then_some(last_seen),
            reconnect_count: self.connects.load(Ordering::Relaxed).saturating_sub(1),
        }
    }

    /// Record traffic from the agent.
    pub fn touch(&self) {
        self.last_seen_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    /// Install a new active connection, displacing any previous one.
    fn install(&self, tx: mpsc::UnboundedSender<String>, cancel: CancellationToken) -> u64 {
        let conn_id = self.connects.fetch_add(1, Ordering::Relaxed) + 1;
        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            debug!(old_conn = old.conn_id, "replacing extension connection");
            old.cancel.cancel();
        }
        *guard = Some(ActiveConn { conn_id, tx, cancel });
        self.touch();
        conn_id
    }

    /// Tear down `conn_id` if it is still the active connection. Returns true
    /// when this call actually took the link down (the caller then fails the
    /// in-flight requests).
    fn deactivate(&self, conn_id: u64) -> bool {
        let mut guard = self.lock();
        match guard.as_ref() {
            Some(conn) if conn.conn_id == conn_id => {
                *guard = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for ExtensionLink {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /` on the extension port — WebSocket upgrade for the agent.
pub async fn ext_ws_handler(
    State(state): State<Arc<BridgeState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent(state, socket))
}

/// Per-connection loop for the agent socket: handshake, then a reader that
/// feeds the dispatcher and a writer draining the link queue.
async fn handle_agent(state: Arc<BridgeState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The agent must announce itself before the link goes up.
    let hello = tokio::time::timeout(state.config.handshake_timeout(), ws_rx.next()).await;
    let announced = match hello {
        Ok(Some(Ok(Message::Text(text)))) => {
            matches!(classify(&text), Frame::Event(evt) if evt.method == "extension_connected")
        }
        _ => false,
    };
    if !announced {
        warn!("extension connection dropped: no handshake within deadline");
        return;
    }

    let (tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let cancel = state.shutdown.child_token();
    let conn_id = state.link.install(tx, cancel.clone());
    info!(conn_id, "extension link established");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            out = out_rx.recv() => {
                match out {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            debug!(conn_id, "extension write failed");
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.link.touch();
                        dispatch::handle_agent_text(&state, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(conn_id, "extension socket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(conn_id, err = %e, "extension socket error");
                        break;
                    }
                    _ => {} // ping/pong/binary ignored
                }
            }
        }
    }

    if state.link.deactivate(conn_id) {
        warn!(conn_id, "extension link down");
        link_down(&state).await;
    }
}

/// Fail every in-flight request with `LinkDown` and drop the target model;
/// it is rebuilt from events once the agent reconnects.
async fn link_down(state: &Arc<BridgeState>) {
    let pending = state.registry.fail_all();
    let failed = pending.len();
    for p in pending {
        dispatch::deliver_error(state, p, BridgeError::LinkDown).await;
    }
    let emits = state.targets.clear_all();
    for emit in emits {
        state.clients.send_json(emit.client_id, &emit.frame).await;
    }
    if failed > 0 {
        info!(failed, "in-flight requests failed with LinkDown");
    }
}

/// Serve the extension listener until shutdown. The initial bind happened in
/// `Bridge::bind` (startup failures are fatal there); later serve/bind
/// failures retry with jittered exponential backoff.
pub async fn serve_ext(state: Arc<BridgeState>, listener: TcpListener) {
    let Ok(addr) = listener.local_addr() else {
        warn!("extension listener has no local addr");
        return;
    };
    let mut listener = Some(listener);
    let mut backoff = BACKOFF_BASE;

    loop {
        if state.shutdown.is_cancelled() {
            return;
        }
        let current = match listener.take() {
            Some(l) => l,
            None => match TcpListener::bind(addr).await {
                Ok(l) => {
                    backoff = BACKOFF_BASE;
                    l
                }
                Err(e) => {
                    warn!(err = %e, ?backoff, "extension listener rebind failed");
                    tokio::select! {
                        _ = state.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(jittered(backoff)) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    continue;
                }
            },
        };

        let router = crate::transport::build_ext_router(Arc::clone(&state));
        let shutdown = state.shutdown.clone();
        match axum::serve(current, router).with_graceful_shutdown(shutdown.cancelled_owned()).await
        {
            Ok(()) => return,
            Err(e) => {
                warn!(err = %e, "extension listener failed, restarting");
                tokio::select! {
                    _ = state.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(jittered(backoff)) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

/// Apply ±20% jitter to a backoff delay.
fn jittered(d: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.8..1.2);
    d.mul_f64(factor)
}
