// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process bridge harness plus WebSocket helpers for integration tests.
//!
//! Binds every listener on an ephemeral port and provides a scripted
//! [`FakeAgent`] that plays the browser-extension side of the link.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::BridgeConfig;
use crate::Bridge;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
pub type WsRx = futures_util::stream::SplitStream<WsStream>;

/// Default receive timeout for test helpers.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Config with ephemeral ports, suitable for parallel test runs.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".to_owned(),
        native_port: 0,
        cdp_port: 0,
        ext_port: 0,
        log_limit: 1000,
        request_timeout_ms: 15_000,
        handshake_timeout_ms: 5_000,
        reap_interval_ms: 100,
        event_buffer: 256,
    }
}

/// A bound bridge with URL helpers.
pub struct TestBridge {
    pub bridge: Bridge,
}

impl TestBridge {
    /// Native endpoint WebSocket URL.
    pub fn native_url(&self) -> String {
        format!("ws://{}/", self.bridge.native_addr)
    }

    /// Browser-scope CDP WebSocket URL (arbitrary token, as discovery would
    /// hand out).
    pub fn cdp_url(&self) -> String {
        format!(
            "ws://{}/devtools/browser/{}",
            self.bridge.cdp_addr, self.bridge.state.browser_token
        )
    }

    /// Discovery HTTP URL for a path like `/json/list`.
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.bridge.cdp_addr)
    }

    /// Extension endpoint address (for [`FakeAgent::connect`]).
    pub fn ext_addr(&self) -> SocketAddr {
        self.bridge.ext_addr
    }

    pub fn shutdown(&self) {
        self.bridge.shutdown();
    }
}

/// Bind a bridge on ephemeral ports with the default test config.
pub async fn spawn_bridge() -> anyhow::Result<TestBridge> {
    spawn_bridge_with(test_config()).await
}

/// Bind a bridge with a custom config (ports are forced ephemeral).
pub async fn spawn_bridge_with(mut config: BridgeConfig) -> anyhow::Result<TestBridge> {
    config.host = "127.0.0.1".to_owned();
    config.native_port = 0;
    config.cdp_port = 0;
    config.ext_port = 0;
    let bridge = Bridge::bind(config).await?;
    Ok(TestBridge { bridge })
}

// ---------------------------------------------------------------------------
// WebSocket helpers
// ---------------------------------------------------------------------------

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| anyhow::anyhow!("ws connect {url}: {e}"))?;
    Ok(stream.split())
}

/// Send a JSON message over the WebSocket.
pub async fn ws_send(tx: &mut WsTx, value: &Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    tx.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
    Ok(())
}

/// Receive the next JSON message, with a timeout.
pub async fn ws_recv(rx: &mut WsRx, timeout: Duration) -> anyhow::Result<Value> {
    let msg = tokio::time::timeout(timeout, rx.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
        .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;

    match msg {
        WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

/// Receive JSON messages until one satisfies `pred`, discarding the rest.
pub async fn ws_recv_until(
    rx: &mut WsRx,
    timeout: Duration,
    pred: impl Fn(&Value) -> bool,
) -> anyhow::Result<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("ws recv_until timeout"))?;
        let value = ws_recv(rx, remaining).await?;
        if pred(&value) {
            return Ok(value);
        }
    }
}

// ---------------------------------------------------------------------------
// Fake agent
// ---------------------------------------------------------------------------

/// What the fake agent does with one incoming request.
pub enum AgentReply {
    Result(Value),
    Error(String),
    /// Do not answer; lets timeout and link-down paths be exercised.
    Ignore,
}

/// Scripted reply function: `(method, params) → reply`.
pub type Responder = Box<dyn Fn(&str, &Value) -> AgentReply + Send + Sync>;

/// A request the bridge forwarded upstream, as the agent saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

enum AgentCmd {
    Emit(Value),
    Close,
}

/// Plays the browser-extension side of the link: connects to the extension
/// port, performs the handshake, answers requests by script, and can emit
/// events on demand.
pub struct FakeAgent {
    cmd_tx: mpsc::UnboundedSender<AgentCmd>,
    seen_rx: mpsc::UnboundedReceiver<SeenRequest>,
}

impl FakeAgent {
    /// Connect with the default responder.
    pub async fn connect(ext_addr: SocketAddr) -> anyhow::Result<Self> {
        Self::connect_with(ext_addr, default_responder()).await
    }

    /// Connect with a custom responder.
    pub async fn connect_with(ext_addr: SocketAddr, responder: Responder) -> anyhow::Result<Self> {
        let url = format!("ws://{ext_addr}/");
        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| anyhow::anyhow!("agent connect: {e}"))?;
        let (mut tx, mut rx) = stream.split();

        let hello = json!({ "method": "extension_connected", "params": { "version": "test" } });
        tx.send(WsMessage::Text(hello.to_string().into()))
            .await
            .map_err(|e| anyhow::anyhow!("agent handshake: {e}"))?;

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<AgentCmd>();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel::<SeenRequest>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(AgentCmd::Emit(frame)) => {
                                if tx.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(AgentCmd::Close) | None => {
                                let _ = tx.send(WsMessage::Close(None)).await;
                                let _ = tx.close().await;
                                break;
                            }
                        }
                    }
                    msg = rx.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                    continue;
                                };
                                let id = value.get("id").and_then(Value::as_u64);
                                let method = value.get("method").and_then(Value::as_str);
                                let (Some(id), Some(method)) = (id, method) else {
                                    continue;
                                };
                                let params =
                                    value.get("params").cloned().unwrap_or(Value::Null);
                                let _ = seen_tx.send(SeenRequest {
                                    id,
                                    method: method.to_owned(),
                                    params: params.clone(),
                                });
                                let reply = match responder(method, &params) {
                                    AgentReply::Result(result) => json!({
                                        "id": id, "success": true, "result": result,
                                    }),
                                    AgentReply::Error(error) => json!({
                                        "id": id, "success": false, "error": error,
                                    }),
                                    AgentReply::Ignore => continue,
                                };
                                if tx
                                    .send(WsMessage::Text(reply.to_string().into()))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Err(_)) => break,
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(Self { cmd_tx, seen_rx })
    }

    /// Emit an agent event, e.g. `tab_created`.
    pub fn emit(&self, method: &str, params: Value) {
        let _ = self.cmd_tx.send(AgentCmd::Emit(json!({ "method": method, "params": params })));
    }

    /// Emit a raw frame verbatim (for malformed-frame tests).
    pub fn emit_raw(&self, frame: Value) {
        let _ = self.cmd_tx.send(AgentCmd::Emit(frame));
    }

    /// Next request the bridge forwarded upstream.
    pub async fn next_request(&mut self, timeout: Duration) -> anyhow::Result<SeenRequest> {
        tokio::time::timeout(timeout, self.seen_rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("no upstream request within timeout"))?
            .ok_or_else(|| anyhow::anyhow!("agent task ended"))
    }

    /// Drop the link from the agent side.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(AgentCmd::Close);
    }
}

/// Default responder: every method succeeds with a small result;
/// `create_tab` hands out fresh tab ids starting at 1000.
pub fn default_responder() -> Responder {
    let next_tab = Arc::new(AtomicI64::new(1000));
    Box::new(move |method, _params| match method {
        "list_tabs" => AgentReply::Result(json!({ "tabs": [] })),
        "create_tab" => {
            let tab_id = next_tab.fetch_add(1, Ordering::Relaxed);
            AgentReply::Result(json!({ "tabId": tab_id }))
        }
        _ => AgentReply::Result(json!({ "ok": true })),
    })
}
