// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-frame classification, done once at the edge.
//!
//! Every inbound message is turned into a tagged variant here; all downstream
//! code dispatches on the tag instead of re-inspecting ad-hoc JSON fields.

use serde_json::Value;

use crate::error::{invalid, BridgeError};

/// An inbound frame from the extension link, classified.
///
/// A frame with a numeric top-level `id` and no `method` is a response; a
/// frame with a `method` and an absent or null `id` is an event; anything
/// else is malformed and dropped after logging.
#[derive(Debug)]
pub enum Frame {
    Response(UpstreamResponse),
    Event(UpstreamEvent),
    Malformed(&'static str),
}

/// A response from the agent to a previously forwarded request.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub id: u64,
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

/// An unsolicited event from the agent.
#[derive(Debug)]
pub struct UpstreamEvent {
    pub method: String,
    pub params: Value,
}

/// Classify one frame of agent-originated text.
pub fn classify(text: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Frame::Malformed("not valid JSON");
    };
    let Some(obj) = value.as_object() else {
        return Frame::Malformed("not a JSON object");
    };

    let id = obj.get("id").filter(|v| !v.is_null());
    let method = obj.get("method").and_then(Value::as_str);

    match (id, method) {
        (Some(_), Some(_)) => Frame::Malformed("frame has both id and method"),
        (Some(id), None) => match id.as_u64() {
            Some(id) => {
                let error = obj.get("error").and_then(error_string);
                let success = obj
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or_else(|| error.is_none());
                Frame::Response(UpstreamResponse {
                    id,
                    success,
                    result: obj.get("result").cloned().unwrap_or(Value::Null),
                    error,
                })
            }
            None => Frame::Malformed("response id is not an unsigned integer"),
        },
        (None, Some(method)) => Frame::Event(UpstreamEvent {
            method: method.to_owned(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        }),
        (None, None) => Frame::Malformed("frame has neither id nor method"),
    }
}

/// Agent errors arrive as a bare string or as `{message}`; either way the
/// client sees the text verbatim.
fn error_string(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            Some(obj.get("message").and_then(Value::as_str).unwrap_or("agent error").to_owned())
        }
        other => Some(other.to_string()),
    }
}

/// A request parsed off a client socket (either endpoint).
///
/// The `id` is opaque: numbers and strings are kept as raw JSON and echoed
/// back byte-identically.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub id: Value,
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

impl ClientRequest {
    /// Parse and validate a client request envelope.
    ///
    /// The error carries the offending `id` (null when none could be read) so
    /// the caller can still produce a correlated error response.
    pub fn parse(text: &str) -> Result<Self, (Value, BridgeError)> {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Err((Value::Null, invalid("request is not valid JSON")));
        };
        let Some(obj) = value.as_object() else {
            return Err((Value::Null, invalid("request is not a JSON object")));
        };

        let id = obj.get("id").cloned().unwrap_or(Value::Null);
        if id.is_null() {
            return Err((Value::Null, invalid("id is required")));
        }
        if !(id.is_number() || id.is_string()) {
            return Err((Value::Null, invalid("id must be a number or a string")));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            return Err((id, invalid("method is required")));
        };
        if method.is_empty() {
            return Err((id, invalid("method is required")));
        }

        let params = match obj.get("params") {
            None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
            Some(Value::Object(p)) => Value::Object(p.clone()),
            Some(_) => return Err((id, invalid("params must be an object"))),
        };

        let session_id = match obj.get("sessionId") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err((id, invalid("sessionId must be a string"))),
        };

        Ok(Self { id, method: method.to_owned(), params, session_id })
    }

    /// Fetch a required integer `tabId` from params.
    pub fn tab_id(&self) -> Result<i64, BridgeError> {
        self.params
            .get("tabId")
            .and_then(Value::as_i64)
            .ok_or_else(|| invalid("tabId is required"))
    }

    /// Fetch a required string param.
    pub fn str_param(&self, key: &str) -> Result<&str, BridgeError> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("{key} is required")))
    }
}

// -- Outbound CDP frame builders ----------------------------------------------
//
// CDP clients assert on frame shape: responses never carry `method`, events
// never carry `id`. Building every outbound frame here keeps that true.

/// CDP response `{id, result, sessionId?}`.
pub fn cdp_response_frame(id: &Value, result: Value, session_id: Option<&str>) -> Value {
    let mut frame = serde_json::json!({ "id": id, "result": result });
    if let (Some(obj), Some(sid)) = (frame.as_object_mut(), session_id) {
        obj.insert("sessionId".to_owned(), Value::String(sid.to_owned()));
    }
    frame
}

/// CDP error response `{id, error: {code, message}, sessionId?}`.
pub fn cdp_error_frame(id: &Value, err: &BridgeError, session_id: Option<&str>) -> Value {
    let mut frame = serde_json::json!({ "id": id, "error": err.to_cdp_error() });
    if let (Some(obj), Some(sid)) = (frame.as_object_mut(), session_id) {
        obj.insert("sessionId".to_owned(), Value::String(sid.to_owned()));
    }
    frame
}

/// CDP event `{method, params, sessionId?}`.
pub fn cdp_event_frame(method: &str, params: Value, session_id: Option<&str>) -> Value {
    let mut frame = serde_json::json!({ "method": method, "params": params });
    if let (Some(obj), Some(sid)) = (frame.as_object_mut(), session_id) {
        obj.insert("sessionId".to_owned(), Value::String(sid.to_owned()));
    }
    frame
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
