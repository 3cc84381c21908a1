// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

// ── wire strings ──────────────────────────────────────────────────────

#[test]
fn unit_kinds_display_their_name() {
    assert_eq!(BridgeError::LinkDown.to_string(), "LinkDown");
    assert_eq!(BridgeError::Timeout.to_string(), "Timeout");
    assert_eq!(BridgeError::TargetNotFound.to_string(), "TargetNotFound");
    assert_eq!(BridgeError::SessionNotFound.to_string(), "SessionNotFound");
    assert_eq!(BridgeError::Forbidden.to_string(), "Forbidden");
    assert_eq!(BridgeError::UnknownMethod.to_string(), "UnknownMethod");
}

#[test]
fn invalid_argument_displays_message_verbatim() {
    let err = invalid("tabId is required");
    assert_eq!(err.to_string(), "tabId is required");
    assert_eq!(err.kind(), "InvalidArgument");
}

#[test]
fn agent_error_echoes_verbatim() {
    let err = BridgeError::AgentError("no such tab: 42".to_owned());
    assert_eq!(err.to_string(), "no such tab: 42");
    assert_eq!(err.kind(), "AgentError");
}

// ── CDP codes ─────────────────────────────────────────────────────────

#[test]
fn cdp_codes_match_jsonrpc_convention() {
    assert_eq!(invalid("x").cdp_code(), -32602);
    assert_eq!(BridgeError::UnknownMethod.cdp_code(), -32601);
    assert_eq!(BridgeError::SessionNotFound.cdp_code(), -32001);
    assert_eq!(BridgeError::Timeout.cdp_code(), -32000);
    assert_eq!(BridgeError::LinkDown.cdp_code(), -32000);
}

#[test]
fn cdp_error_body_serializes_code_and_message() {
    let body = BridgeError::SessionNotFound.to_cdp_error();
    let json = serde_json::to_value(&body).expect("serialize");
    assert_eq!(json["code"], -32001);
    assert_eq!(json["message"], "SessionNotFound");
}
