// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transports: the Native endpoint, the DevTools endpoint
//! with its discovery routes, and the extension inbound route.

pub mod cdp;
pub mod http;
pub mod native;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::BridgeState;
use crate::upstream::link;

/// Router for the DevTools port: CDP WebSocket paths plus HTTP discovery.
pub fn build_cdp_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/json", get(http::json_list))
        .route("/json/list", get(http::json_list))
        .route("/json/version", get(http::json_version))
        .route("/json/protocol", get(http::json_protocol))
        .route("/logs", get(http::logs))
        .route("/devtools/browser/{token}", get(cdp::cdp_browser_handler))
        .route("/devtools/page/{target_id}", get(cdp::cdp_page_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Router for the Native protocol port.
pub fn build_native_router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/", get(native::native_ws_handler))
        .route("/ws", get(native::native_ws_handler))
        .with_state(state)
}

/// Router for the extension inbound port (the agent connects here).
pub fn build_ext_router(state: Arc<BridgeState>) -> Router {
    Router::new().route("/", get(link::ext_ws_handler)).with_state(state)
}
