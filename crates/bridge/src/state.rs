// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::calllog::{digest, CallLog};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::events::EventBus;
use crate::registry::{NewRequest, PendingKind, RequestRegistry};
use crate::targets::TargetRegistry;
use crate::upstream::link::ExtensionLink;

/// Identifies a connected client.
pub type ClientId = u64;

/// Which endpoint a client connected through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Native,
    Devtools,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Devtools => "devtools",
        }
    }
}

/// Per-client bookkeeping: outbound queue plus metadata. The connection task
/// is the only reader of the queue, so writes to a socket stay serialized.
struct ClientSlot {
    kind: EndpointKind,
    name: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

/// Connected clients, keyed by id.
pub struct ClientTable {
    next_id: AtomicU64,
    inner: RwLock<HashMap<ClientId, ClientSlot>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), inner: RwLock::new(HashMap::new()) }
    }

    /// Register a connection; returns its id and the outbound receiver.
    pub async fn add(
        &self,
        kind: EndpointKind,
        name: Option<String>,
    ) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.insert(id, ClientSlot { kind, name, tx });
        (id, rx)
    }

    /// Drop a connection. Nothing is delivered to it afterwards.
    pub async fn remove(&self, id: ClientId) {
        self.inner.write().await.remove(&id);
    }

    /// Enqueue a JSON frame for one client. Returns false if the client is
    /// gone (the frame is discarded, per disconnect semantics).
    pub async fn send_json(&self, id: ClientId, frame: &Value) -> bool {
        let guard = self.inner.read().await;
        match guard.get(&id) {
            Some(slot) => slot.tx.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    pub async fn name_of(&self, id: ClientId) -> Option<String> {
        self.inner.read().await.get(&id).and_then(|s| s.name.clone())
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide bridge state. Built once in `run` (or a test harness) and
/// passed into every task — there are no global singletons.
pub struct BridgeState {
    pub config: BridgeConfig,
    pub shutdown: CancellationToken,
    pub registry: RequestRegistry,
    pub targets: TargetRegistry,
    pub events: EventBus,
    pub calllog: CallLog,
    pub clients: ClientTable,
    pub link: ExtensionLink,
    /// Token in the advertised `/devtools/browser/<token>` URL.
    pub browser_token: String,
}

impl BridgeState {
    pub fn new(config: BridgeConfig, shutdown: CancellationToken) -> Self {
        let events = EventBus::new(config.event_buffer);
        let calllog = CallLog::new(config.log_limit);
        Self {
            config,
            shutdown,
            registry: RequestRegistry::new(),
            targets: TargetRegistry::new(),
            events,
            calllog,
            clients: ClientTable::new(),
            link: ExtensionLink::new(),
            browser_token: Uuid::new_v4().to_string(),
        }
    }

    /// Register a request and send it upstream, atomically with respect to id
    /// allocation, so upstream send order matches allocation order. The
    /// forwarded frame is the client's envelope with the `id` replaced and
    /// `tabId` merged into params when a session resolved to one.
    pub fn forward_upstream(
        &self,
        client_id: ClientId,
        client_msg_id: Value,
        method: &str,
        params: Value,
        tab_id: Option<i64>,
        session_id: Option<String>,
        kind: PendingKind,
    ) -> Result<u64, BridgeError> {
        let mut params = params;
        if let Some(tab) = tab_id {
            if let Some(obj) = params.as_object_mut() {
                obj.insert("tabId".to_owned(), Value::from(tab));
            }
        }
        let new = NewRequest {
            client_id,
            client_msg_id,
            method: method.to_owned(),
            params_digest: digest(&params),
            session_id,
            kind,
            timeout: self.config.request_timeout(),
        };
        self.registry.register(new, |upstream_id| {
            self.link.send(&json!({
                "id": upstream_id,
                "method": method,
                "params": params,
            }))
        })
    }
}
