// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios for the bridge: both protocols, a scripted agent,
//! and the cross-cutting invariants (id round-trip, session id shape, event
//! isolation, link-down and timeout semantics, CDP frame shapes).

use std::time::Duration;

use serde_json::json;

use brop_specs::{
    assert_cdp_frame_shape, is_uuid_v4, spawn_bridge, spawn_bridge_with, test_config, ws_connect,
    ws_recv, ws_recv_until, ws_send, AgentReply, FakeAgent, RECV_TIMEOUT,
};

// ---------------------------------------------------------------------------
// Scenario 1: id preservation across concurrent clients
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_clients_keep_their_own_ids() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let _agent = FakeAgent::connect(bridge.ext_addr()).await?;

    let (mut tx_a, mut rx_a) = ws_connect(&bridge.native_url()).await?;
    let (mut tx_b, mut rx_b) = ws_connect(&bridge.native_url()).await?;

    // Both clients use the same opaque id at the same time.
    let req = json!({"id": "x", "method": "list_tabs", "params": {}});
    ws_send(&mut tx_a, &req).await?;
    ws_send(&mut tx_b, &req).await?;

    let resp_a = ws_recv(&mut rx_a, RECV_TIMEOUT).await?;
    let resp_b = ws_recv(&mut rx_b, RECV_TIMEOUT).await?;
    assert_eq!(resp_a["id"], "x");
    assert_eq!(resp_b["id"], "x");
    assert_eq!(resp_a["success"], true);
    assert_eq!(resp_b["success"], true);
    Ok(())
}

#[tokio::test]
async fn boundary_ids_round_trip() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let _agent = FakeAgent::connect(bridge.ext_addr()).await?;

    let (mut tx, mut rx) = ws_connect(&bridge.native_url()).await?;
    for id in [json!(0), json!(""), json!(9_007_199_254_740_993_u64)] {
        ws_send(&mut tx, &json!({"id": id, "method": "list_tabs", "params": {}})).await?;
        let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
        assert_eq!(resp["id"], id, "id must round-trip exactly");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 2: UUID session id via auto-attach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_attach_emits_uuid_v4_session() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let _agent = FakeAgent::connect(bridge.ext_addr()).await?;

    let (mut tx, mut rx) = ws_connect(&bridge.cdp_url()).await?;
    ws_send(
        &mut tx,
        &json!({"id": 1, "method": "Target.setAutoAttach",
                "params": {"autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true}}),
    )
    .await?;
    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp["id"], 1);

    ws_send(
        &mut tx,
        &json!({"id": 2, "method": "Target.createTarget", "params": {"url": "about:blank"}}),
    )
    .await?;

    let attached = ws_recv_until(&mut rx, RECV_TIMEOUT, |v| {
        v.get("method") == Some(&json!("Target.attachedToTarget"))
    })
    .await?;
    let session_id = attached["params"]["sessionId"].as_str().unwrap_or_default();
    assert!(is_uuid_v4(session_id), "not a UUID v4: {session_id}");
    // waitForDebuggerOnStart was requested, but the bridge never holds
    // targets at the debugger gate.
    assert_eq!(attached["params"]["waitingForDebugger"], false);

    let resp = ws_recv_until(&mut rx, RECV_TIMEOUT, |v| v.get("id") == Some(&json!(2))).await?;
    let target_id = resp["result"]["targetId"].as_str().unwrap_or_default();
    assert!(!target_id.is_empty());
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 3: event isolation between subscribers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tab_events_reach_only_their_subscribers() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let agent = FakeAgent::connect(bridge.ext_addr()).await?;

    let (mut tx_a, mut rx_a) = ws_connect(&bridge.native_url()).await?;
    let (mut tx_b, mut rx_b) = ws_connect(&bridge.native_url()).await?;

    ws_send(&mut tx_a, &json!({"id": 1, "method": "subscribe_tab_events", "params": {"tabId": 1}}))
        .await?;
    ws_recv(&mut rx_a, RECV_TIMEOUT).await?;
    ws_send(&mut tx_b, &json!({"id": 1, "method": "subscribe_tab_events", "params": {"tabId": 2}}))
        .await?;
    ws_recv(&mut rx_b, RECV_TIMEOUT).await?;

    // An external actor closes tab 1.
    agent.emit("tab_closed", json!({"tabId": 1}));

    let event = ws_recv(&mut rx_a, RECV_TIMEOUT).await?;
    assert_eq!(event["event_type"], "tab_closed");
    assert_eq!(event["tabId"], 1);

    // B sees nothing about tab 1: its next frame is the marker response.
    ws_send(&mut tx_b, &json!({"id": "marker", "method": "list_tabs", "params": {}})).await?;
    let next = ws_recv(&mut rx_b, RECV_TIMEOUT).await?;
    assert_eq!(next["id"], "marker", "B received a foreign frame: {next}");
    Ok(())
}

#[tokio::test]
async fn double_subscribe_delivers_once() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let agent = FakeAgent::connect(bridge.ext_addr()).await?;

    let (mut tx, mut rx) = ws_connect(&bridge.native_url()).await?;
    for id in [1, 2] {
        ws_send(
            &mut tx,
            &json!({"id": id, "method": "subscribe_tab_events", "params": {"tabId": 6}}),
        )
        .await?;
        ws_recv(&mut rx, RECV_TIMEOUT).await?;
    }

    agent.emit("tab_closed", json!({"tabId": 6}));

    let event = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(event["event_type"], "tab_closed");

    // Exactly one copy: the next frame is the marker response.
    ws_send(&mut tx, &json!({"id": "marker", "method": "list_tabs", "params": {}})).await?;
    let next = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(next["id"], "marker", "duplicate event delivered: {next}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 4: strict tabId enforcement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn navigate_without_tab_id_never_reaches_the_agent() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let mut agent = FakeAgent::connect(bridge.ext_addr()).await?;

    let (mut tx, mut rx) = ws_connect(&bridge.native_url()).await?;
    ws_send(
        &mut tx,
        &json!({"id": 1, "method": "navigate", "params": {"url": "https://example.com"}}),
    )
    .await?;

    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error"], "tabId is required");

    // The very next upstream frame is the marker, proving navigate was
    // rejected before the link.
    ws_send(&mut tx, &json!({"id": 2, "method": "list_tabs", "params": {}})).await?;
    let seen = agent.next_request(RECV_TIMEOUT).await?;
    assert_eq!(seen.method, "list_tabs");
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 5: link-down handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn link_down_fails_in_flight_and_recovers_on_reconnect() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let mut agent = FakeAgent::connect_with(
        bridge.ext_addr(),
        Box::new(|method, _| match method {
            "get_screenshot" => AgentReply::Ignore,
            _ => AgentReply::Result(json!({"ok": true})),
        }),
    )
    .await?;

    let (mut tx, mut rx) = ws_connect(&bridge.native_url()).await?;
    ws_send(&mut tx, &json!({"id": 1, "method": "get_screenshot", "params": {"tabId": 1}}))
        .await?;
    // Wait until the request is in flight upstream before dropping the link.
    agent.next_request(RECV_TIMEOUT).await?;
    agent.close();

    // The in-flight request fails within a second.
    let resp = ws_recv(&mut rx, Duration::from_secs(1)).await?;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error"], "LinkDown");

    // New requests fail fast while the link is down.
    ws_send(&mut tx, &json!({"id": 2, "method": "list_tabs", "params": {}})).await?;
    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp["error"], "LinkDown");

    // After the agent reconnects, requests succeed again.
    let _agent = FakeAgent::connect(bridge.ext_addr()).await?;
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    let mut marker = 100;
    loop {
        marker += 1;
        ws_send(&mut tx, &json!({"id": marker, "method": "list_tabs", "params": {}})).await?;
        let resp =
            ws_recv_until(&mut rx, RECV_TIMEOUT, |v| v.get("id") == Some(&json!(marker))).await?;
        if resp["success"] == true {
            return Ok(());
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "link never recovered: {resp}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// Timeout semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_responses_after_timeout_are_dropped() -> anyhow::Result<()> {
    let mut config = test_config();
    config.request_timeout_ms = 200;
    config.reap_interval_ms = 50;
    let bridge = spawn_bridge_with(config).await?;

    let mut agent = FakeAgent::connect_with(
        bridge.ext_addr(),
        Box::new(|method, _| match method {
            "get_screenshot" => AgentReply::Ignore,
            _ => AgentReply::Result(json!({"ok": true})),
        }),
    )
    .await?;

    let (mut tx, mut rx) = ws_connect(&bridge.native_url()).await?;
    ws_send(&mut tx, &json!({"id": 1, "method": "get_screenshot", "params": {"tabId": 1}}))
        .await?;
    let seen = agent.next_request(RECV_TIMEOUT).await?;

    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["error"], "Timeout");

    // The agent answers far too late; the client must not see a second
    // response for id 1.
    agent.emit_raw(json!({"id": seen.id, "success": true, "result": {"data": "late"}}));
    ws_send(&mut tx, &json!({"id": "marker", "method": "list_tabs", "params": {}})).await?;
    let next = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(next["id"], "marker", "late response leaked through: {next}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Extension error surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_then_get_extension_errors_is_empty() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;

    // Stateful script: the agent keeps an error list until cleared.
    let errors = std::sync::Arc::new(std::sync::Mutex::new(vec![json!({
        "message": "content script crashed",
    })]));
    let responder_errors = std::sync::Arc::clone(&errors);
    let _agent = FakeAgent::connect_with(
        bridge.ext_addr(),
        Box::new(move |method, _| {
            let mut errors = match responder_errors.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match method {
                "get_extension_errors" => {
                    AgentReply::Result(json!({"errors": errors.clone()}))
                }
                "clear_extension_errors" => {
                    errors.clear();
                    AgentReply::Result(json!({}))
                }
                _ => AgentReply::Result(json!({"ok": true})),
            }
        }),
    )
    .await?;

    let (mut tx, mut rx) = ws_connect(&bridge.native_url()).await?;
    ws_send(&mut tx, &json!({"id": 1, "method": "get_extension_errors", "params": {}})).await?;
    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp["result"]["errors"].as_array().map(Vec::len), Some(1));

    ws_send(&mut tx, &json!({"id": 2, "method": "clear_extension_errors", "params": {}})).await?;
    ws_recv(&mut rx, RECV_TIMEOUT).await?;

    ws_send(&mut tx, &json!({"id": 3, "method": "get_extension_errors", "params": {}})).await?;
    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp["result"]["errors"].as_array().map(Vec::len), Some(0));
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario 6: CDP frame shape through a full cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_cdp_frame_has_id_xor_method() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let _agent = FakeAgent::connect(bridge.ext_addr()).await?;

    let (mut tx, mut rx) = ws_connect(&bridge.cdp_url()).await?;
    let mut frames = Vec::new();

    // Connect, discover, auto-attach, create, navigate, close.
    ws_send(&mut tx, &json!({"id": 1, "method": "Browser.getVersion", "params": {}})).await?;
    ws_send(
        &mut tx,
        &json!({"id": 2, "method": "Target.setDiscoverTargets", "params": {"discover": true}}),
    )
    .await?;
    ws_send(
        &mut tx,
        &json!({"id": 3, "method": "Target.setAutoAttach",
                "params": {"autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true}}),
    )
    .await?;
    ws_send(
        &mut tx,
        &json!({"id": 4, "method": "Target.createTarget", "params": {"url": "about:blank"}}),
    )
    .await?;

    // Collect frames until the createTarget response, then navigate in the
    // session and close the target.
    let mut session_id = String::new();
    let mut target_id = String::new();
    loop {
        let frame = ws_recv(&mut rx, RECV_TIMEOUT).await?;
        assert_cdp_frame_shape(&frame);
        if frame.get("method") == Some(&json!("Target.attachedToTarget")) {
            session_id =
                frame["params"]["sessionId"].as_str().unwrap_or_default().to_owned();
        }
        if frame.get("id") == Some(&json!(4)) {
            target_id = frame["result"]["targetId"].as_str().unwrap_or_default().to_owned();
            frames.push(frame);
            break;
        }
        frames.push(frame);
    }
    anyhow::ensure!(!session_id.is_empty(), "no attachedToTarget seen");
    anyhow::ensure!(!target_id.is_empty(), "no createTarget result seen");

    ws_send(
        &mut tx,
        &json!({"id": 5, "method": "Page.navigate",
                "params": {"url": "https://example.com"}, "sessionId": session_id}),
    )
    .await?;
    ws_send(
        &mut tx,
        &json!({"id": 6, "method": "Target.closeTarget", "params": {"targetId": target_id}}),
    )
    .await?;

    loop {
        let frame = ws_recv(&mut rx, RECV_TIMEOUT).await?;
        assert_cdp_frame_shape(&frame);
        let done = frame.get("id") == Some(&json!(6));
        frames.push(frame);
        if done {
            break;
        }
    }

    // The cycle produced a healthy mix of responses and events.
    assert!(frames.iter().any(|f| f.get("method").is_some()), "no events observed");
    assert!(frames.len() >= 6, "expected at least six frames, got {}", frames.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Disconnect hygiene
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnecting_client_abandons_its_requests() -> anyhow::Result<()> {
    let bridge = spawn_bridge().await?;
    let mut agent = FakeAgent::connect_with(
        bridge.ext_addr(),
        Box::new(|method, _| match method {
            "get_screenshot" => AgentReply::Ignore,
            _ => AgentReply::Result(json!({"ok": true})),
        }),
    )
    .await?;

    let (mut tx, rx) = ws_connect(&bridge.native_url()).await?;
    ws_send(&mut tx, &json!({"id": 1, "method": "get_screenshot", "params": {"tabId": 1}}))
        .await?;
    let seen = agent.next_request(RECV_TIMEOUT).await?;

    // Client vanishes; the late agent response has nowhere to go and the
    // bridge must survive it.
    drop(tx);
    drop(rx);
    tokio::time::sleep(Duration::from_millis(100)).await;
    agent.emit_raw(json!({"id": seen.id, "success": true, "result": {}}));

    // Bridge still serves other clients.
    let (mut tx2, mut rx2) = ws_connect(&bridge.native_url()).await?;
    ws_send(&mut tx2, &json!({"id": 1, "method": "list_tabs", "params": {}})).await?;
    let resp = ws_recv(&mut rx2, RECV_TIMEOUT).await?;
    assert_eq!(resp["success"], true);
    Ok(())
}
