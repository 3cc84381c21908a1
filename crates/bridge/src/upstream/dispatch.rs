// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single consumer of inbound agent frames.
//!
//! Responses are correlated through the registry and delivered to the
//! originating client only; events update the target model and fan out to
//! interested clients. Running on one task is what keeps per-target event
//! order FIFO for every subscriber.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::events::{TabEvent, TabEventKind};
use crate::frame::{
    cdp_error_frame, cdp_event_frame, cdp_response_frame, classify, Frame, UpstreamEvent,
    UpstreamResponse,
};
use crate::registry::{PendingKind, PendingRequest};
use crate::state::BridgeState;

/// Classify and handle one text frame from the agent.
pub async fn handle_agent_text(state: &Arc<BridgeState>, text: &str) {
    match classify(text) {
        Frame::Response(resp) => handle_response(state, resp).await,
        Frame::Event(evt) => handle_event(state, evt).await,
        Frame::Malformed(reason) => {
            warn!(reason, "malformed upstream frame dropped");
            state.calllog.append(
                "<malformed>",
                reason.to_owned(),
                Err(BridgeError::Malformed.to_string()),
                crate::calllog::epoch_ms(),
            );
        }
    }
}

async fn handle_response(state: &Arc<BridgeState>, resp: UpstreamResponse) {
    let Some(pending) = state.registry.complete(resp.id) else {
        warn!(upstream_id = resp.id, "late upstream response dropped");
        return;
    };
    let outcome = if resp.success {
        Ok(resp.result)
    } else {
        Err(BridgeError::AgentError(resp.error.unwrap_or_else(|| "agent error".to_owned())))
    };
    deliver(state, pending, outcome).await;
}

/// Fail a pending request (timeout, link down, …) toward its originator.
pub async fn deliver_error(state: &Arc<BridgeState>, pending: PendingRequest, err: BridgeError) {
    deliver(state, pending, Err(err)).await;
}

/// Shape the client-facing response for a completed exchange, enqueue it on
/// the originator's socket, and record the call.
async fn deliver(
    state: &Arc<BridgeState>,
    pending: PendingRequest,
    outcome: Result<Value, BridgeError>,
) {
    let log_outcome = match &outcome {
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    };
    state.calllog.append(
        &pending.method,
        pending.params_digest.clone(),
        log_outcome,
        pending.created_ms,
    );

    let session_id = pending.session_id.as_deref();
    let frame = match (&pending.kind, outcome) {
        (PendingKind::Native, Ok(result)) => json!({
            "id": pending.client_msg_id,
            "success": true,
            "result": result,
        }),
        (PendingKind::Native, Err(e)) => json!({
            "id": pending.client_msg_id,
            "success": false,
            "error": e.to_string(),
        }),

        (PendingKind::CdpSession, Ok(result)) => {
            cdp_response_frame(&pending.client_msg_id, object_or_empty(result), session_id)
        }

        (PendingKind::CdpCreateTarget { url }, Ok(result)) => {
            match result.get("tabId").and_then(Value::as_i64) {
                Some(tab_id) => {
                    let fresh = state.targets.get_by_tab(tab_id).is_none();
                    let (target, emits) =
                        state.targets.upsert_tab(tab_id, Some(url.clone()), None);
                    for emit in emits {
                        state.clients.send_json(emit.client_id, &emit.frame).await;
                    }
                    if fresh {
                        state.events.publish(TabEvent {
                            kind: TabEventKind::Created,
                            tab_id,
                            url: Some(url.clone()),
                            title: None,
                        });
                    }
                    cdp_response_frame(
                        &pending.client_msg_id,
                        json!({ "targetId": target.target_id }),
                        session_id,
                    )
                }
                None => cdp_error_frame(
                    &pending.client_msg_id,
                    &BridgeError::AgentError("create_tab returned no tabId".to_owned()),
                    session_id,
                ),
            }
        }

        (PendingKind::CdpCloseTarget { target_id }, Ok(_)) => {
            if let Some((_, emits)) = state.targets.remove_target(target_id) {
                for emit in emits {
                    state.clients.send_json(emit.client_id, &emit.frame).await;
                }
            }
            cdp_response_frame(&pending.client_msg_id, json!({ "success": true }), session_id)
        }

        (PendingKind::CdpActivateTarget, Ok(_)) => {
            cdp_response_frame(&pending.client_msg_id, json!({}), session_id)
        }

        (
            PendingKind::CdpSession
            | PendingKind::CdpCreateTarget { .. }
            | PendingKind::CdpCloseTarget { .. }
            | PendingKind::CdpActivateTarget,
            Err(e),
        ) => cdp_error_frame(&pending.client_msg_id, &e, session_id),
    };

    if !state.clients.send_json(pending.client_id, &frame).await {
        debug!(client_id = pending.client_id, "originator gone, response discarded");
    }
}

async fn handle_event(state: &Arc<BridgeState>, evt: UpstreamEvent) {
    match evt.method.as_str() {
        // Repeated hello on an established link is harmless.
        "extension_connected" => {}

        "tab_created" | "tab_updated" | "tab_activated" | "tab_removed" | "tab_closed" => {
            let Some(tab_id) = evt.params.get("tabId").and_then(Value::as_i64) else {
                warn!(method = %evt.method, "tab event without tabId dropped");
                return;
            };
            let url = evt.params.get("url").and_then(Value::as_str).map(str::to_owned);
            let title = evt.params.get("title").and_then(Value::as_str).map(str::to_owned);

            let kind = match evt.method.as_str() {
                "tab_created" => TabEventKind::Created,
                "tab_updated" => TabEventKind::Updated,
                "tab_activated" => TabEventKind::Activated,
                "tab_removed" => TabEventKind::Removed,
                _ => TabEventKind::Closed,
            };

            // Target model first, then the bus, so a CDP observer never sees
            // an event for a target the model does not yet have. A created
            // notification for a tab the model already holds (created via
            // Target.createTarget moments ago) is not re-broadcast.
            let fresh = kind != TabEventKind::Created
                || state.targets.get_by_tab(tab_id).is_none();
            let emits = match kind {
                TabEventKind::Created | TabEventKind::Updated => {
                    let (_, emits) = state.targets.upsert_tab(tab_id, url.clone(), title.clone());
                    emits
                }
                TabEventKind::Removed | TabEventKind::Closed => state
                    .targets
                    .remove_tab(tab_id)
                    .map(|(_, emits)| emits)
                    .unwrap_or_default(),
                TabEventKind::Activated => Vec::new(),
            };
            for emit in emits {
                state.clients.send_json(emit.client_id, &emit.frame).await;
            }
            if fresh {
                state.events.publish(TabEvent { kind, tab_id, url, title });
            }
        }

        // Dotted methods are CDP domain events scoped to one tab; replicate
        // per attached session with that session's id.
        method if method.contains('.') => {
            let Some(tab_id) = evt.params.get("tabId").and_then(Value::as_i64) else {
                warn!(method, "scoped agent event without tabId dropped");
                return;
            };
            let mut params = evt.params.clone();
            if let Some(obj) = params.as_object_mut() {
                obj.remove("tabId");
            }
            for session in state.targets.sessions_for_tab(tab_id) {
                let frame = cdp_event_frame(method, params.clone(), Some(&session.session_id));
                state.clients.send_json(session.client_id, &frame).await;
            }
        }

        other => {
            debug!(method = other, "unhandled agent event");
        }
    }
}

/// CDP results must be objects; anything else collapses to `{}`.
fn object_or_empty(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        _ => json!({}),
    }
}

/// Periodically fail pending requests past their deadline.
pub fn spawn_reaper(state: Arc<BridgeState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = state.config.reap_interval();
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            for pending in state.registry.reap(Instant::now()) {
                warn!(
                    upstream_id = pending.upstream_id,
                    method = %pending.method,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    "request timed out"
                );
                deliver_error(&state, pending, BridgeError::Timeout).await;
            }
        }
    })
}
