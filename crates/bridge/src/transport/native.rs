// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native protocol endpoint: flat `{id, method, params}` over WebSocket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::calllog::{digest, epoch_ms};
use crate::error::BridgeError;
use crate::events::{Subscriptions, TabEventKind};
use crate::frame::ClientRequest;
use crate::registry::PendingKind;
use crate::state::{BridgeState, ClientId, EndpointKind};

/// Methods that operate on one tab and therefore require `params.tabId`.
/// There is no "active tab" fallback; a missing tabId never reaches the agent.
const TAB_SCOPED_METHODS: &[&str] = &[
    "navigate",
    "get_page_content",
    "get_console_logs",
    "get_screenshot",
    "execute_console",
    "get_simplified_dom",
    "close_tab",
];

/// URL schemes the agent is never asked to touch.
const RESTRICTED_SCHEMES: &[&str] = &["chrome://", "chrome-extension://", "devtools://"];

/// Query parameters for the Native WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct NativeQuery {
    /// Optional human-readable client name, used in logs.
    pub name: Option<String>,
}

/// `GET /` on the native port — WebSocket upgrade for automation clients.
pub async fn native_ws_handler(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<NativeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_native(state, socket, query.name))
}

/// Per-connection loop. This task is the only writer to the socket: queued
/// responses, bus events, and local replies all pass through it in order.
async fn handle_native(state: Arc<BridgeState>, socket: WebSocket, name: Option<String>) {
    let (client_id, mut out_rx) = state.clients.add(EndpointKind::Native, name.clone()).await;
    info!(client_id, name = name.as_deref().unwrap_or(""), "native client connected");

    let mut bus_rx = state.events.subscribe();
    let mut subs = Subscriptions::default();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            out = out_rx.recv() => {
                match out {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            event = bus_rx.recv() => {
                match event {
                    Ok(event) => {
                        if subs.wants(&event) {
                            let text = event.wire_json().to_string();
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        state.events.note_lagged(n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_request(&state, client_id, &mut subs, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.clients.remove(client_id).await;
    let forgotten = state.registry.forget_client(client_id);
    debug!(client_id, forgotten, "native client disconnected");
}

/// Validate one request and either answer it locally or forward it upstream.
async fn handle_request(
    state: &Arc<BridgeState>,
    client_id: ClientId,
    subs: &mut Subscriptions,
    text: &str,
) {
    let started_ms = epoch_ms();
    let req = match ClientRequest::parse(text) {
        Ok(req) => req,
        Err((id, err)) => {
            record_local(state, "<invalid>", &Value::Null, Err(&err), started_ms);
            respond_err(state, client_id, &id, &err).await;
            return;
        }
    };

    match req.method.as_str() {
        "subscribe_tab_events" => {
            let outcome = subscribe(subs, &req);
            record_local(state, &req.method, &req.params, outcome.as_ref().map(|_| ()), started_ms);
            finish_local(state, client_id, &req.id, outcome).await;
        }
        "unsubscribe_tab_events" => {
            let outcome = req.tab_id().map(|tab_id| {
                subs.unsubscribe(tab_id);
                json!({})
            });
            record_local(state, &req.method, &req.params, outcome.as_ref().map(|_| ()), started_ms);
            finish_local(state, client_id, &req.id, outcome).await;
        }
        "list_subscriptions" => {
            let outcome = Ok(subs.list());
            record_local(state, &req.method, &req.params, Ok(()), started_ms);
            finish_local(state, client_id, &req.id, outcome).await;
        }
        method => {
            if let Err(err) = validate_forward(&req) {
                record_local(state, method, &req.params, Err(&err), started_ms);
                respond_err(state, client_id, &req.id, &err).await;
                return;
            }
            let forwarded = state.forward_upstream(
                client_id,
                req.id.clone(),
                method,
                req.params.clone(),
                None,
                None,
                PendingKind::Native,
            );
            if let Err(err) = forwarded {
                record_local(state, method, &req.params, Err(&err), started_ms);
                respond_err(state, client_id, &req.id, &err).await;
            }
            // Success responses arrive via the dispatcher.
        }
    }
}

/// Strict envelope checks that must never reach the agent when violated.
fn validate_forward(req: &ClientRequest) -> Result<(), BridgeError> {
    if TAB_SCOPED_METHODS.contains(&req.method.as_str()) {
        req.tab_id()?;
    }
    if matches!(req.method.as_str(), "navigate" | "create_tab") {
        if let Some(url) = req.params.get("url").and_then(Value::as_str) {
            if is_restricted_url(url) {
                return Err(BridgeError::Forbidden);
            }
        }
    }
    Ok(())
}

/// Whether a URL points at browser-internal surfaces the agent must not open.
pub fn is_restricted_url(url: &str) -> bool {
    RESTRICTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

fn subscribe(subs: &mut Subscriptions, req: &ClientRequest) -> Result<Value, BridgeError> {
    let tab_id = req.tab_id()?;
    let kinds: Vec<TabEventKind> = req
        .params
        .get("events")
        .and_then(Value::as_array)
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(Value::as_str)
                .filter_map(TabEventKind::parse)
                .collect()
        })
        .unwrap_or_default();
    subs.subscribe(tab_id, &kinds);
    Ok(json!({}))
}

async fn finish_local(
    state: &Arc<BridgeState>,
    client_id: ClientId,
    id: &Value,
    outcome: Result<Value, BridgeError>,
) {
    match outcome {
        Ok(result) => {
            let frame = json!({ "id": id, "success": true, "result": result });
            state.clients.send_json(client_id, &frame).await;
        }
        Err(err) => respond_err(state, client_id, id, &err).await,
    }
}

async fn respond_err(state: &Arc<BridgeState>, client_id: ClientId, id: &Value, err: &BridgeError) {
    let frame = json!({ "id": id, "success": false, "error": err.to_string() });
    state.clients.send_json(client_id, &frame).await;
}

fn record_local(
    state: &Arc<BridgeState>,
    method: &str,
    params: &Value,
    outcome: Result<(), &BridgeError>,
    started_ms: u64,
) {
    state.calllog.append(
        method,
        digest(params),
        outcome.map_err(|e| e.to_string()),
        started_ms,
    );
}
