// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end bridge scenarios.
//!
//! Re-exports the in-process bridge harness and adds assertions shared by
//! the scenario suite.

pub use brop_bridge::test_support::*;

use serde_json::Value;

/// Whether `s` is a UUID v4: lowercase, hyphenated, version nibble 4.
pub fn is_uuid_v4(s: &str) -> bool {
    if s.len() != 36 || s != s.to_lowercase() {
        return false;
    }
    match uuid::Uuid::parse_str(s) {
        Ok(parsed) => parsed.get_version_num() == 4,
        Err(_) => false,
    }
}

/// CDP frame-shape invariant: a frame is either a response (`id`, no
/// `method`) or an event (`method`, no `id`) — never both.
pub fn assert_cdp_frame_shape(frame: &Value) {
    let has_id = frame.get("id").is_some_and(|v| !v.is_null());
    let has_method = frame.get("method").is_some();
    assert!(
        !(has_id && has_method),
        "frame carries both id and method: {frame}"
    );
    assert!(
        has_id || has_method,
        "frame carries neither id nor method: {frame}"
    );
}
