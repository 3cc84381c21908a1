// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tab-lifecycle event bus for Native clients.
//!
//! Buffered broadcast: every subscriber owns a bounded queue; a slow consumer
//! loses the oldest buffered events and the bus counts the loss. Per-client
//! subscription filters live in the connection task and die with it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Tab-lifecycle event kinds, as they appear in `event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabEventKind {
    Created,
    Closed,
    Removed,
    Updated,
    Activated,
}

impl TabEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "tab_created",
            Self::Closed => "tab_closed",
            Self::Removed => "tab_removed",
            Self::Updated => "tab_updated",
            Self::Activated => "tab_activated",
        }
    }

    /// Parse a subscription kind token (`"closed"`, `"updated"`, …).
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "created" => Some(Self::Created),
            "closed" => Some(Self::Closed),
            "removed" => Some(Self::Removed),
            "updated" => Some(Self::Updated),
            "activated" => Some(Self::Activated),
            _ => None,
        }
    }
}

/// One tab-lifecycle event as broadcast on the bus.
#[derive(Debug, Clone)]
pub struct TabEvent {
    pub kind: TabEventKind,
    pub tab_id: i64,
    pub url: Option<String>,
    pub title: Option<String>,
}

impl TabEvent {
    /// Native wire form: `{event_type, tabId, url?, title?}`.
    pub fn wire_json(&self) -> Value {
        let mut frame = json!({
            "event_type": self.kind.as_str(),
            "tabId": self.tab_id,
        });
        if let Some(obj) = frame.as_object_mut() {
            if let Some(ref url) = self.url {
                obj.insert("url".to_owned(), Value::String(url.clone()));
            }
            if let Some(ref title) = self.title {
                obj.insert("title".to_owned(), Value::String(title.clone()));
            }
        }
        frame
    }
}

/// Broadcast hub for tab-lifecycle events.
pub struct EventBus {
    tx: broadcast::Sender<TabEvent>,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx, dropped: AtomicU64::new(0) }
    }

    /// Publish an event to every subscriber. No subscribers is not an error.
    pub fn publish(&self, event: TabEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.tx.subscribe()
    }

    /// Record that a subscriber lagged and lost `n` events.
    pub fn note_lagged(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Total events dropped across all subscribers, exposed via `/logs`.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A client's standing interest in tab events: tab id → wanted kinds.
///
/// Owned by the connection task; removed wholesale when the socket closes.
#[derive(Debug, Default)]
pub struct Subscriptions {
    tabs: HashMap<i64, Vec<TabEventKind>>,
}

impl Subscriptions {
    /// Subscribe a tab to the given kinds (all kinds when empty). Repeated
    /// calls for the same tab are idempotent: kinds are merged, not stacked.
    pub fn subscribe(&mut self, tab_id: i64, kinds: &[TabEventKind]) {
        let all = [
            TabEventKind::Created,
            TabEventKind::Closed,
            TabEventKind::Removed,
            TabEventKind::Updated,
            TabEventKind::Activated,
        ];
        let wanted: &[TabEventKind] = if kinds.is_empty() { &all } else { kinds };
        let entry = self.tabs.entry(tab_id).or_default();
        for kind in wanted {
            if !entry.contains(kind) {
                entry.push(*kind);
            }
        }
    }

    /// Drop a tab subscription. Unknown tabs are a no-op.
    pub fn unsubscribe(&mut self, tab_id: i64) {
        self.tabs.remove(&tab_id);
    }

    /// Whether this client wants the given event.
    pub fn wants(&self, event: &TabEvent) -> bool {
        self.tabs.get(&event.tab_id).is_some_and(|kinds| kinds.contains(&event.kind))
    }

    /// Snapshot for `list_subscriptions`.
    pub fn list(&self) -> Value {
        let mut tabs: Vec<Value> = self
            .tabs
            .iter()
            .map(|(tab_id, kinds)| {
                json!({
                    "tabId": tab_id,
                    "events": kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        tabs.sort_by_key(|v| v.get("tabId").and_then(Value::as_i64));
        json!({ "subscriptions": tabs })
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
