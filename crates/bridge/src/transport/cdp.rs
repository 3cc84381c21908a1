// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DevTools protocol endpoint.
//!
//! Speaks enough CDP that standard clients can drive the browser through the
//! bridge. Browser-scope commands are answered from the target model;
//! session-scoped commands resolve `sessionId → tabId` and travel upstream.
//! Shape invariants (events without `id`, responses without `method`,
//! `waitingForDebugger:false`) hold by construction via the frame builders.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::calllog::{digest, epoch_ms};
use crate::error::BridgeError;
use crate::frame::{cdp_error_frame, cdp_response_frame, ClientRequest};
use crate::registry::PendingKind;
use crate::state::{BridgeState, ClientId, EndpointKind};
use crate::transport::native::is_restricted_url;

/// `GET /devtools/browser/{token}` — browser-scope CDP connection. Any token
/// is accepted; the path shape is what discovery advertises.
pub async fn cdp_browser_handler(
    State(state): State<Arc<BridgeState>>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!(token, "devtools browser connection");
    ws.on_upgrade(move |socket| handle_cdp(state, socket))
}

/// `GET /devtools/page/{target_id}` — page-path CDP connection, as advertised
/// in `/json/list`. Handled by the same connection loop.
pub async fn cdp_page_handler(
    State(state): State<Arc<BridgeState>>,
    Path(target_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!(target_id, "devtools page connection");
    ws.on_upgrade(move |socket| handle_cdp(state, socket))
}

/// Per-connection loop; the single writer for this client's socket.
async fn handle_cdp(state: Arc<BridgeState>, socket: WebSocket) {
    let (client_id, mut out_rx) = state.clients.add(EndpointKind::Devtools, None).await;
    info!(client_id, "devtools client connected");

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

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(&state, client_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.clients.remove(client_id).await;
    state.registry.forget_client(client_id);
    state.targets.detach_client(client_id);
    debug!(client_id, "devtools client disconnected");
}

/// Route one CDP command. `Target.*` and `Browser.*` are always browser
/// scope; everything else with a sessionId is resolved and forwarded.
async fn handle_command(state: &Arc<BridgeState>, client_id: ClientId, text: &str) {
    let started_ms = epoch_ms();
    let req = match ClientRequest::parse(text) {
        Ok(req) => req,
        Err((id, err)) => {
            state.calllog.append("<invalid>", String::new(), Err(err.to_string()), started_ms);
            state.clients.send_json(client_id, &cdp_error_frame(&id, &err, None)).await;
            return;
        }
    };

    let outcome = match req.method.as_str() {
        "Browser.getVersion" => Some(Ok(version_result())),

        "Target.getTargets" => {
            Some(Ok(json!({ "targetInfos": state.targets.target_infos() })))
        }

        "Target.setDiscoverTargets" => {
            let discover =
                req.params.get("discover").and_then(Value::as_bool).unwrap_or(false);
            // Replay of existing targets goes out before the response.
            for emit in state.targets.set_discover(client_id, discover) {
                state.clients.send_json(emit.client_id, &emit.frame).await;
            }
            Some(Ok(json!({})))
        }

        "Target.setAutoAttach" => {
            let on = req.params.get("autoAttach").and_then(Value::as_bool).unwrap_or(false);
            state.targets.set_auto_attach(client_id, on);
            Some(Ok(json!({})))
        }

        "Target.attachToTarget" => Some(attach_to_target(state, client_id, &req).await),

        "Target.detachFromTarget" => Some(detach_from_target(state, client_id, &req).await),

        "Target.createTarget" => create_target(state, client_id, &req),

        "Target.closeTarget" => {
            forward_target_command(state, client_id, &req, "close_tab", |target_id| {
                PendingKind::CdpCloseTarget { target_id }
            })
        }

        "Target.activateTarget" => {
            forward_target_command(state, client_id, &req, "activate_tab", |_| {
                PendingKind::CdpActivateTarget
            })
        }

        _ if req.session_id.is_some() => match forward_session_command(state, client_id, &req) {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        },

        // Browser-scope enables and settings succeed with an empty result.
        method if method.starts_with("Browser.") || method.starts_with("Runtime.") => {
            Some(Ok(json!({})))
        }

        _ => Some(Err(BridgeError::UnknownMethod)),
    };

    // Forwarded commands respond via the dispatcher; local ones respond here.
    if let Some(outcome) = outcome {
        let log_outcome = match &outcome {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        state.calllog.append(&req.method, digest(&req.params), log_outcome, started_ms);

        let session_id = req.session_id.as_deref();
        let frame = match outcome {
            Ok(result) => cdp_response_frame(&req.id, result, session_id),
            Err(err) => cdp_error_frame(&req.id, &err, session_id),
        };
        state.clients.send_json(client_id, &frame).await;
    }
}

/// `Target.attachToTarget`: idempotent per (client, target); the attach event
/// precedes the response carrying the sessionId.
async fn attach_to_target(
    state: &Arc<BridgeState>,
    client_id: ClientId,
    req: &ClientRequest,
) -> Result<Value, BridgeError> {
    let target_id = req.str_param("targetId")?;
    let (session, emits) = state.targets.attach(client_id, target_id, false)?;
    for emit in emits {
        state.clients.send_json(emit.client_id, &emit.frame).await;
    }
    Ok(json!({ "sessionId": session.session_id }))
}

async fn detach_from_target(
    state: &Arc<BridgeState>,
    client_id: ClientId,
    req: &ClientRequest,
) -> Result<Value, BridgeError> {
    let session_id = req.str_param("sessionId")?;
    state.targets.resolve_session(session_id, client_id)?;
    let (_, emits) = state.targets.detach(session_id).ok_or(BridgeError::SessionNotFound)?;
    for emit in emits {
        state.clients.send_json(emit.client_id, &emit.frame).await;
    }
    Ok(json!({}))
}

/// `Target.createTarget` forwards `create_tab`; the dispatcher upserts the
/// target and answers `{targetId}` when the agent responds.
fn create_target(
    state: &Arc<BridgeState>,
    client_id: ClientId,
    req: &ClientRequest,
) -> Option<Result<Value, BridgeError>> {
    let url = req
        .params
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or("about:blank")
        .to_owned();
    if is_restricted_url(&url) {
        return Some(Err(BridgeError::Forbidden));
    }
    let forwarded = state.forward_upstream(
        client_id,
        req.id.clone(),
        "create_tab",
        json!({ "url": url }),
        None,
        req.session_id.clone(),
        PendingKind::CdpCreateTarget { url },
    );
    match forwarded {
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }
}

/// Resolve `params.targetId` to a tab and forward an agent command for it.
fn forward_target_command(
    state: &Arc<BridgeState>,
    client_id: ClientId,
    req: &ClientRequest,
    agent_method: &str,
    kind: impl FnOnce(String) -> PendingKind,
) -> Option<Result<Value, BridgeError>> {
    let target_id = match req.str_param("targetId") {
        Ok(t) => t.to_owned(),
        Err(e) => return Some(Err(e)),
    };
    let Some(target) = state.targets.get(&target_id) else {
        return Some(Err(BridgeError::TargetNotFound));
    };
    let forwarded = state.forward_upstream(
        client_id,
        req.id.clone(),
        agent_method,
        json!({}),
        Some(target.tab_id),
        req.session_id.clone(),
        kind(target_id),
    );
    match forwarded {
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }
}

/// Session-scoped passthrough: `{method, params, tabId}` upstream, response
/// tagged with the original sessionId by the dispatcher.
fn forward_session_command(
    state: &Arc<BridgeState>,
    client_id: ClientId,
    req: &ClientRequest,
) -> Result<(), BridgeError> {
    let session_id = req.session_id.clone().ok_or(BridgeError::SessionNotFound)?;
    let (_, tab_id) = state.targets.resolve_session(&session_id, client_id)?;
    state
        .forward_upstream(
            client_id,
            req.id.clone(),
            &req.method,
            req.params.clone(),
            Some(tab_id),
            Some(session_id),
            PendingKind::CdpSession,
        )
        .map(|_| ())
}

/// Static version payload for `Browser.getVersion`.
pub fn version_result() -> Value {
    json!({
        "protocolVersion": "1.3",
        "product": "Chrome/124.0.6367.78",
        "revision": "@9e6ded5ac1ff5e38d930ae52bd9aec09bd1a68e4",
        "userAgent": "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "jsVersion": "12.4.254.8",
    })
}
