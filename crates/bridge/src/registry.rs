// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request registry: 1–1 correlation between upstream requests and client
//! responses, regardless of how clients number their own requests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::calllog::epoch_ms;
use crate::error::BridgeError;
use crate::state::ClientId;

/// How the dispatcher should shape the eventual client response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// Native `{id, success, result?, error?}` envelope.
    Native,
    /// CDP passthrough; the response is tagged with the pending sessionId.
    CdpSession,
    /// `Target.createTarget` — the result becomes `{targetId}` and the new
    /// target is upserted before auto-attach fan-out.
    CdpCreateTarget { url: String },
    /// `Target.closeTarget` — the target is removed and destroyed-events
    /// emitted on success.
    CdpCloseTarget { target_id: String },
    /// `Target.activateTarget` — empty result on success.
    CdpActivateTarget,
}

/// One request forwarded upstream whose response has not yet returned.
#[derive(Debug)]
pub struct PendingRequest {
    pub upstream_id: u64,
    pub client_id: ClientId,
    /// The originator's own id, opaque (number or string), echoed back
    /// byte-identically.
    pub client_msg_id: Value,
    pub method: String,
    pub params_digest: String,
    pub session_id: Option<String>,
    pub kind: PendingKind,
    pub created_at: Instant,
    pub created_ms: u64,
    pub deadline: Instant,
}

struct Inner {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
    shutting_down: bool,
}

/// Encapsulated pending-request store. Upstream ids are monotonically
/// increasing integers starting at 1; each maps to at most one entry.
///
/// The lock is never held across an await. `register` runs the caller's
/// forward closure inside the critical section, so allocation order and
/// upstream send order are the same.
pub struct RequestRegistry {
    inner: Mutex<Inner>,
}

/// Everything `register` needs to know about a new request.
pub struct NewRequest {
    pub client_id: ClientId,
    pub client_msg_id: Value,
    pub method: String,
    pub params_digest: String,
    pub session_id: Option<String>,
    pub kind: PendingKind,
    pub timeout: Duration,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { next_id: 1, pending: HashMap::new(), shutting_down: false }) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocate the next upstream id, run `forward` with it, and record the
    /// entry. If `forward` fails (link down) nothing is recorded and the
    /// error is returned to the caller.
    pub fn register(
        &self,
        new: NewRequest,
        forward: impl FnOnce(u64) -> Result<(), BridgeError>,
    ) -> Result<u64, BridgeError> {
        let mut inner = self.lock();
        if inner.shutting_down {
            return Err(BridgeError::ShuttingDown);
        }

        let upstream_id = inner.next_id;
        forward(upstream_id)?;
        inner.next_id += 1;

        let now = Instant::now();
        inner.pending.insert(
            upstream_id,
            PendingRequest {
                upstream_id,
                client_id: new.client_id,
                client_msg_id: new.client_msg_id,
                method: new.method,
                params_digest: new.params_digest,
                session_id: new.session_id,
                kind: new.kind,
                created_at: now,
                created_ms: epoch_ms(),
                deadline: now + new.timeout,
            },
        );
        Ok(upstream_id)
    }

    /// Remove and return the entry for a completed upstream exchange.
    pub fn complete(&self, upstream_id: u64) -> Option<PendingRequest> {
        self.lock().pending.remove(&upstream_id)
    }

    /// Drop every entry whose originator is `client_id`. The upstream call is
    /// not cancelled; any late response is discarded at `complete` time.
    pub fn forget_client(&self, client_id: ClientId) -> usize {
        let mut inner = self.lock();
        let before = inner.pending.len();
        inner.pending.retain(|_, p| p.client_id != client_id);
        before - inner.pending.len()
    }

    /// Remove and return every entry past its deadline, oldest first.
    pub fn reap(&self, now: Instant) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        let expired: Vec<u64> =
            inner.pending.values().filter(|p| p.deadline <= now).map(|p| p.upstream_id).collect();
        let mut out: Vec<PendingRequest> =
            expired.iter().filter_map(|id| inner.pending.remove(id)).collect();
        out.sort_by_key(|p| p.upstream_id);
        out
    }

    /// Drain every entry, oldest first. Used when the extension link drops.
    pub fn fail_all(&self) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        let mut out: Vec<PendingRequest> = inner.pending.drain().map(|(_, p)| p).collect();
        out.sort_by_key(|p| p.upstream_id);
        out
    }

    /// Reject all registrations from now on.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
    }

    /// Number of in-flight entries.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
