// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative model of browser targets (tabs) and CDP sessions.
//!
//! Mutations return an ordered emission plan instead of writing to sockets;
//! the single dispatcher task executes the plan, which is what keeps
//! per-target event delivery FIFO for every subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::frame::cdp_event_frame;
use crate::state::ClientId;

/// A logical browser tab.
#[derive(Debug, Clone)]
pub struct Target {
    pub target_id: String,
    pub tab_id: i64,
    pub url: String,
    pub title: String,
    pub attached: bool,
}

/// A CDP attachment between one client and one target.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub target_id: String,
    pub client_id: ClientId,
    pub auto_attached: bool,
}

/// One CDP event frame destined for one client, in delivery order.
#[derive(Debug)]
pub struct Emit {
    pub client_id: ClientId,
    pub frame: Value,
}

struct Inner {
    targets: IndexMap<String, Target>,
    by_tab: HashMap<i64, String>,
    sessions: HashMap<String, Session>,
    auto_attach: HashSet<ClientId>,
    discover: HashSet<ClientId>,
}

/// Target & session registry. All maps are private; mutation happens only
/// through the operations below. The lock is never held across an await.
pub struct TargetRegistry {
    inner: Mutex<Inner>,
    browser_context_id: String,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                targets: IndexMap::new(),
                by_tab: HashMap::new(),
                sessions: HashMap::new(),
                auto_attach: HashSet::new(),
                discover: HashSet::new(),
            }),
            browser_context_id: new_target_id(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Default browser context advertised in target infos.
    pub fn browser_context_id(&self) -> &str {
        &self.browser_context_id
    }

    /// Record a tab (new or updated). New tabs are announced to discovering
    /// clients and auto-attached for every client that opted in; updates emit
    /// `Target.targetInfoChanged`.
    pub fn upsert_tab(
        &self,
        tab_id: i64,
        url: Option<String>,
        title: Option<String>,
    ) -> (Target, Vec<Emit>) {
        let mut inner = self.lock();
        let mut emits = Vec::new();

        if let Some(target_id) = inner.by_tab.get(&tab_id).cloned() {
            let target = match inner.targets.get_mut(&target_id) {
                Some(target) => {
                    if let Some(url) = url {
                        target.url = url;
                    }
                    if let Some(title) = title {
                        target.title = title;
                    }
                    target.clone()
                }
                None => Target {
                    target_id: target_id.clone(),
                    tab_id,
                    url: String::new(),
                    title: String::new(),
                    attached: false,
                },
            };
            let info = self.target_info_locked(&target);
            for client in &inner.discover {
                emits.push(Emit {
                    client_id: *client,
                    frame: cdp_event("Target.targetInfoChanged", json!({ "targetInfo": info })),
                });
            }
            return (target, emits);
        }

        let target = Target {
            target_id: new_target_id(),
            tab_id,
            url: url.unwrap_or_default(),
            title: title.unwrap_or_default(),
            attached: false,
        };
        inner.by_tab.insert(tab_id, target.target_id.clone());
        inner.targets.insert(target.target_id.clone(), target.clone());

        let info = self.target_info_locked(&target);
        for client in &inner.discover {
            emits.push(Emit {
                client_id: *client,
                frame: cdp_event("Target.targetCreated", json!({ "targetInfo": info })),
            });
        }

        // Auto-attach fan-out: one fresh session per opted-in client.
        let auto_clients: Vec<ClientId> = inner.auto_attach.iter().copied().collect();
        for client in auto_clients {
            let session = Session {
                session_id: new_session_id(),
                target_id: target.target_id.clone(),
                client_id: client,
                auto_attached: true,
            };
            inner.sessions.insert(session.session_id.clone(), session.clone());
            if let Some(t) = inner.targets.get_mut(&target.target_id) {
                t.attached = true;
            }
            let info = attached_info(&inner, &target.target_id, self.browser_context_id());
            emits.push(Emit {
                client_id: client,
                frame: cdp_event(
                    "Target.attachedToTarget",
                    json!({
                        "sessionId": session.session_id,
                        "targetInfo": info,
                        "waitingForDebugger": false,
                    }),
                ),
            });
        }

        let target = inner.targets.get(&target.target_id).cloned().unwrap_or(target);
        (target, emits)
    }

    /// Remove a tab. Sessions on it are detached (with events to their
    /// owners) and discovering clients get `Target.targetDestroyed`.
    pub fn remove_tab(&self, tab_id: i64) -> Option<(Target, Vec<Emit>)> {
        let target_id = self.lock().by_tab.get(&tab_id).cloned()?;
        self.remove_target(&target_id)
    }

    /// Remove a target by id (the `Target.closeTarget` path).
    pub fn remove_target(&self, target_id: &str) -> Option<(Target, Vec<Emit>)> {
        let mut inner = self.lock();
        let target = inner.targets.shift_remove(target_id)?;
        inner.by_tab.remove(&target.tab_id);

        let mut emits = Vec::new();
        let detached: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.target_id == target.target_id)
            .cloned()
            .collect();
        for session in detached {
            inner.sessions.remove(&session.session_id);
            emits.push(Emit {
                client_id: session.client_id,
                frame: cdp_event(
                    "Target.detachedFromTarget",
                    json!({ "sessionId": session.session_id, "targetId": target.target_id }),
                ),
            });
        }
        for client in &inner.discover {
            emits.push(Emit {
                client_id: *client,
                frame: cdp_event(
                    "Target.targetDestroyed",
                    json!({ "targetId": target.target_id }),
                ),
            });
        }
        Some((target, emits))
    }

    /// Open (or reuse) a session between `client_id` and a target.
    ///
    /// Concurrent or repeated attaches for the same (client, target) pair are
    /// idempotent: the first session wins and is returned again. The attach
    /// event is emitted only for a fresh session.
    pub fn attach(
        &self,
        client_id: ClientId,
        target_id: &str,
        auto: bool,
    ) -> Result<(Session, Vec<Emit>), BridgeError> {
        let mut inner = self.lock();
        if !inner.targets.contains_key(target_id) {
            return Err(BridgeError::TargetNotFound);
        }

        if let Some(existing) = inner
            .sessions
            .values()
            .find(|s| s.client_id == client_id && s.target_id == target_id)
            .cloned()
        {
            return Ok((existing, Vec::new()));
        }

        let session = Session {
            session_id: new_session_id(),
            target_id: target_id.to_owned(),
            client_id,
            auto_attached: auto,
        };
        inner.sessions.insert(session.session_id.clone(), session.clone());
        if let Some(t) = inner.targets.get_mut(target_id) {
            t.attached = true;
        }

        let info = attached_info(&inner, target_id, self.browser_context_id());
        let emits = vec![Emit {
            client_id,
            frame: cdp_event(
                "Target.attachedToTarget",
                json!({
                    "sessionId": session.session_id,
                    "targetInfo": info,
                    "waitingForDebugger": false,
                }),
            ),
        }];
        Ok((session, emits))
    }

    /// Close a session. The owner gets `Target.detachedFromTarget`.
    pub fn detach(&self, session_id: &str) -> Option<(Session, Vec<Emit>)> {
        let mut inner = self.lock();
        let session = inner.sessions.remove(session_id)?;
        let still_attached =
            inner.sessions.values().any(|s| s.target_id == session.target_id);
        if let Some(t) = inner.targets.get_mut(&session.target_id) {
            t.attached = still_attached;
        }
        let emits = vec![Emit {
            client_id: session.client_id,
            frame: cdp_event(
                "Target.detachedFromTarget",
                json!({ "sessionId": session.session_id, "targetId": session.target_id }),
            ),
        }];
        Some((session, emits))
    }

    /// Purge everything a closing client owned: sessions, auto-attach and
    /// discover flags. No events are emitted; the client is gone.
    pub fn detach_client(&self, client_id: ClientId) {
        let mut inner = self.lock();
        inner.sessions.retain(|_, s| s.client_id != client_id);
        inner.auto_attach.remove(&client_id);
        inner.discover.remove(&client_id);
        let attached: HashSet<String> =
            inner.sessions.values().map(|s| s.target_id.clone()).collect();
        for target in inner.targets.values_mut() {
            target.attached = attached.contains(&target.target_id);
        }
    }

    /// Resolve a sessionId to its target, enforcing ownership.
    pub fn resolve_session(
        &self,
        session_id: &str,
        client_id: ClientId,
    ) -> Result<(String, i64), BridgeError> {
        let inner = self.lock();
        let session = inner.sessions.get(session_id).ok_or(BridgeError::SessionNotFound)?;
        if session.client_id != client_id {
            return Err(BridgeError::SessionNotFound);
        }
        let target =
            inner.targets.get(&session.target_id).ok_or(BridgeError::TargetNotFound)?;
        Ok((target.target_id.clone(), target.tab_id))
    }

    /// Sessions currently attached to the given tab.
    pub fn sessions_for_tab(&self, tab_id: i64) -> Vec<Session> {
        let inner = self.lock();
        let Some(target_id) = inner.by_tab.get(&tab_id) else {
            return Vec::new();
        };
        inner.sessions.values().filter(|s| &s.target_id == target_id).cloned().collect()
    }

    /// Toggle auto-attach for a client. Applies to subsequently created
    /// targets.
    pub fn set_auto_attach(&self, client_id: ClientId, on: bool) {
        let mut inner = self.lock();
        if on {
            inner.auto_attach.insert(client_id);
        } else {
            inner.auto_attach.remove(&client_id);
        }
    }

    /// Toggle target discovery. Enabling replays `Target.targetCreated` for
    /// every live target to the requesting client.
    pub fn set_discover(&self, client_id: ClientId, on: bool) -> Vec<Emit> {
        let mut inner = self.lock();
        if !on {
            inner.discover.remove(&client_id);
            return Vec::new();
        }
        inner.discover.insert(client_id);
        inner
            .targets
            .values()
            .map(|t| Emit {
                client_id,
                frame: cdp_event(
                    "Target.targetCreated",
                    json!({ "targetInfo": self.target_info_locked(t) }),
                ),
            })
            .collect()
    }

    pub fn get(&self, target_id: &str) -> Option<Target> {
        self.lock().targets.get(target_id).cloned()
    }

    pub fn get_by_tab(&self, tab_id: i64) -> Option<Target> {
        let inner = self.lock();
        let target_id = inner.by_tab.get(&tab_id)?;
        inner.targets.get(target_id).cloned()
    }

    /// Live targets in creation order.
    pub fn list(&self) -> Vec<Target> {
        self.lock().targets.values().cloned().collect()
    }

    /// CDP `TargetInfo` payloads for `Target.getTargets` and `/json/list`.
    pub fn target_infos(&self) -> Vec<Value> {
        let inner = self.lock();
        inner.targets.values().map(|t| self.target_info_locked(t)).collect()
    }

    /// Drop all targets and sessions, e.g. when the extension link goes down.
    /// Session owners and discovering clients are notified; auto-attach and
    /// discover preferences survive for when the link comes back.
    pub fn clear_all(&self) -> Vec<Emit> {
        let mut inner = self.lock();
        let mut emits = Vec::new();
        for session in inner.sessions.values() {
            emits.push(Emit {
                client_id: session.client_id,
                frame: cdp_event(
                    "Target.detachedFromTarget",
                    json!({ "sessionId": session.session_id, "targetId": session.target_id }),
                ),
            });
        }
        for target in inner.targets.values() {
            for client in &inner.discover {
                emits.push(Emit {
                    client_id: *client,
                    frame: cdp_event(
                        "Target.targetDestroyed",
                        json!({ "targetId": target.target_id }),
                    ),
                });
            }
        }
        inner.sessions.clear();
        inner.targets.clear();
        inner.by_tab.clear();
        emits
    }

    pub fn target_count(&self) -> usize {
        self.lock().targets.len()
    }

    fn target_info_locked(&self, target: &Target) -> Value {
        json!({
            "targetId": target.target_id,
            "type": "page",
            "title": target.title,
            "url": target.url,
            "attached": target.attached,
            "browserContextId": self.browser_context_id,
            "canAccessOpener": false,
        })
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh target info with the attached flag re-read after a session change.
fn attached_info(inner: &Inner, target_id: &str, browser_context_id: &str) -> Value {
    match inner.targets.get(target_id) {
        Some(t) => json!({
            "targetId": t.target_id,
            "type": "page",
            "title": t.title,
            "url": t.url,
            "attached": t.attached,
            "browserContextId": browser_context_id,
            "canAccessOpener": false,
        }),
        None => Value::Null,
    }
}

/// Browser-scope CDP event (no sessionId).
fn cdp_event(method: &str, params: Value) -> Value {
    cdp_event_frame(method, params, None)
}

/// 32-char uppercase hex id, the shape CDP clients expect for targets.
fn new_target_id() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

/// Session ids are UUID v4, lowercase, hyphenated — clients validate this.
fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
#[path = "targets_tests.rs"]
mod tests;
