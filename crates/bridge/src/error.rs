// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::Serialize;

/// Error kinds surfaced to clients and the call log.
///
/// `Display` produces the wire string for the Native protocol `error` field:
/// unit kinds print their name (so `LinkDown` and `Timeout` round-trip
/// exactly), `InvalidArgument` and `AgentError` print their message verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Envelope malformed or a required field is missing.
    InvalidArgument(String),
    /// Method not recognized by the bridge or unsupported by the agent.
    UnknownMethod,
    /// targetId or tabId not in the current set.
    TargetNotFound,
    /// sessionId not mapped.
    SessionNotFound,
    /// Attempt to operate on a restricted URL.
    Forbidden,
    /// No response within the deadline.
    Timeout,
    /// Extension link disconnected while the request was in flight.
    LinkDown,
    /// The agent returned an error string; echoed verbatim.
    AgentError(String),
    /// Inbound upstream frame violates the protocol.
    Malformed,
    /// The registry no longer accepts new requests.
    ShuttingDown,
}

impl BridgeError {
    /// Stable machine-readable kind, used in logs and the call log ring.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::UnknownMethod => "UnknownMethod",
            Self::TargetNotFound => "TargetNotFound",
            Self::SessionNotFound => "SessionNotFound",
            Self::Forbidden => "Forbidden",
            Self::Timeout => "Timeout",
            Self::LinkDown => "LinkDown",
            Self::AgentError(_) => "AgentError",
            Self::Malformed => "Malformed",
            Self::ShuttingDown => "ShuttingDown",
        }
    }

    /// JSON-RPC style code for the CDP wire form.
    pub fn cdp_code(&self) -> i64 {
        match self {
            Self::InvalidArgument(_) => -32602,
            Self::UnknownMethod => -32601,
            Self::SessionNotFound => -32001,
            _ => -32000,
        }
    }

    /// CDP error payload `{code, message}`.
    pub fn to_cdp_error(&self) -> CdpErrorBody {
        CdpErrorBody { code: self.cdp_code(), message: self.to_string() }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) | Self::AgentError(msg) => f.write_str(msg),
            other => f.write_str(other.kind()),
        }
    }
}

/// CDP protocol error payload, as clients expect it inside `error`.
#[derive(Debug, Clone, Serialize)]
pub struct CdpErrorBody {
    pub code: i64,
    pub message: String,
}

/// Shorthand for the most common validation failure.
pub fn invalid(msg: impl Into<String>) -> BridgeError {
    BridgeError::InvalidArgument(msg.into())
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
