// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded in-memory ring of request/response records, exposed via `/logs`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;

/// Longest params digest kept per entry.
const DIGEST_MAX: usize = 120;

/// One request/response through the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct CallLogEntry {
    pub seq: u64,
    pub method: String,
    pub params: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub level: &'static str,
}

struct Inner {
    entries: VecDeque<CallLogEntry>,
    next_seq: u64,
}

/// Append-only ring of the last N calls. Single writer; readers get a
/// consistent snapshot.
pub struct CallLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl CallLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner { entries: VecDeque::new(), next_seq: 1 }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record one completed call. The oldest entry is discarded once the ring
    /// is full. `params` is the digest produced by [`digest`].
    pub fn append(
        &self,
        method: &str,
        params: String,
        outcome: Result<(), String>,
        started_at_ms: u64,
    ) {
        let finished_at_ms = epoch_ms();
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        let (success, error) = match outcome {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e)),
        };
        inner.entries.push_back(CallLogEntry {
            seq,
            method: method.to_owned(),
            params,
            success,
            error,
            latency_ms: finished_at_ms.saturating_sub(started_at_ms),
            started_at_ms,
            finished_at_ms,
            level: if success { "info" } else { "error" },
        });
    }

    /// Tail of the ring: the newest `limit` entries matching `level`,
    /// oldest first.
    pub fn tail(&self, limit: usize, level: Option<&str>) -> Vec<CallLogEntry> {
        let inner = self.lock();
        let matching: Vec<&CallLogEntry> = inner
            .entries
            .iter()
            .filter(|e| level.is_none_or(|l| e.level == l))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Truncated single-line rendering of request params.
pub fn digest(params: &Value) -> String {
    let mut s = params.to_string();
    if s.len() > DIGEST_MAX {
        let mut cut = DIGEST_MAX;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "calllog_tests.rs"]
mod tests;
