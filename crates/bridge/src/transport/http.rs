// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP discovery endpoints on the DevTools port.
//!
//! Standard CDP clients bootstrap from `/json/version` and `/json/list`; the
//! advertised WebSocket URLs must end in `/devtools/browser/<token>` and
//! `/devtools/page/<targetId>` respectively.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::calllog::CallLogEntry;
use crate::state::BridgeState;
use crate::upstream::link::LinkStatus;

/// Default `/logs` tail length.
const DEFAULT_LOG_TAIL: usize = 100;

/// The host:port clients should dial, preferring the Host header they used.
fn advertised_host(state: &BridgeState, headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{}:{}", state.config.host, state.config.cdp_port))
}

/// `GET /json/version`
pub async fn json_version(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = advertised_host(&state, &headers);
    Json(json!({
        "Browser": "Chrome/124.0.6367.78",
        "Protocol-Version": "1.3",
        "User-Agent": "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "V8-Version": "12.4.254.8",
        "WebKit-Version": "537.36 (@9e6ded5ac1ff5e38d930ae52bd9aec09bd1a68e4)",
        "webSocketDebuggerUrl": format!("ws://{host}/devtools/browser/{}", state.browser_token),
    }))
}

/// `GET /json` and `GET /json/list`
pub async fn json_list(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = advertised_host(&state, &headers);
    let entries: Vec<Value> = state
        .targets
        .list()
        .into_iter()
        .map(|t| {
            let ws_url = format!("ws://{host}/devtools/page/{}", t.target_id);
            json!({
                "description": "",
                "devtoolsFrontendUrl":
                    format!("/devtools/inspector.html?ws={host}/devtools/page/{}", t.target_id),
                "id": t.target_id,
                "title": t.title,
                "type": "page",
                "url": t.url,
                "webSocketDebuggerUrl": ws_url,
            })
        })
        .collect();
    Json(entries)
}

/// `GET /json/protocol` — a stub protocol definition; enough for clients
/// that only check the version and domain names.
pub async fn json_protocol() -> impl IntoResponse {
    Json(json!({
        "version": { "major": "1", "minor": "3" },
        "domains": [
            {
                "domain": "Browser",
                "commands": [ { "name": "getVersion" } ],
            },
            {
                "domain": "Target",
                "commands": [
                    { "name": "getTargets" },
                    { "name": "createTarget" },
                    { "name": "activateTarget" },
                    { "name": "closeTarget" },
                    { "name": "attachToTarget" },
                    { "name": "detachFromTarget" },
                    { "name": "setAutoAttach" },
                    { "name": "setDiscoverTargets" },
                ],
                "events": [
                    { "name": "targetCreated" },
                    { "name": "targetDestroyed" },
                    { "name": "attachedToTarget" },
                    { "name": "detachedFromTarget" },
                ],
            },
            {
                "domain": "Page",
                "commands": [
                    { "name": "enable" },
                    { "name": "navigate" },
                    { "name": "getFrameTree" },
                    { "name": "captureScreenshot" },
                ],
                "events": [ { "name": "frameNavigated" } ],
            },
            {
                "domain": "Runtime",
                "commands": [ { "name": "enable" }, { "name": "evaluate" } ],
            },
        ],
    }))
}

/// Query parameters for `/logs`.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    /// `info` or `error`; omitted means both.
    pub level: Option<String>,
}

/// Payload for `/logs`.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub entries: Vec<CallLogEntry>,
    pub dropped_events: u64,
    pub link: LinkStatus,
}

/// `GET /logs?limit=N&level=…` — tail of the call log ring plus bus and link
/// health.
pub async fn logs(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_TAIL);
    let entries = state.calllog.tail(limit, query.level.as_deref());
    Json(LogsResponse {
        entries,
        dropped_events: state.events.dropped_total(),
        link: state.link.status(),
    })
}
