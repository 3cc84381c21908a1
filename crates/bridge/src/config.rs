// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the bridge.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "brop-bridge", about = "Browser-automation bridge")]
pub struct BridgeConfig {
    /// Host to bind all endpoints on.
    #[arg(long, default_value = "127.0.0.1", env = "BROP_HOST")]
    pub host: String,

    /// Native protocol WebSocket port.
    #[arg(long, default_value_t = 9225, env = "BROP_NATIVE_PORT")]
    pub native_port: u16,

    /// DevTools protocol WebSocket + HTTP discovery port.
    #[arg(long, default_value_t = 9222, env = "BROP_CDP_PORT")]
    pub cdp_port: u16,

    /// Extension inbound link port (the agent connects here).
    #[arg(long, default_value_t = 9224, env = "BROP_EXT_PORT")]
    pub ext_port: u16,

    /// Call log ring capacity.
    #[arg(long, default_value_t = 1000, env = "BROP_LOG_LIMIT")]
    pub log_limit: usize,

    /// Per-request deadline in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "BROP_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Extension link handshake deadline in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "BROP_HANDSHAKE_TIMEOUT_MS")]
    pub handshake_timeout_ms: u64,

    /// Interval between pending-request reap passes in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "BROP_REAP_INTERVAL_MS")]
    pub reap_interval_ms: u64,

    /// Per-subscriber event buffer bound.
    #[arg(long, default_value_t = 256, env = "BROP_EVENT_BUFFER")]
    pub event_buffer: usize,
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reap_interval_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
