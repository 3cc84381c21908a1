// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Brop bridge: a protocol multiplexer between automation clients and a
//! browser extension.
//!
//! Clients connect on two WebSocket endpoints — the flat Native protocol and
//! the Chrome DevTools Protocol — while a single upstream link carries every
//! command to the in-browser agent. The bridge assigns globally unique
//! upstream ids, routes responses back to their originators, models targets
//! and CDP sessions, and fans out tab-lifecycle events to subscribers.

pub mod calllog;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod registry;
pub mod state;
pub mod targets;
pub mod test_support;
pub mod transport;
pub mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BridgeConfig;
use crate::state::BridgeState;
use crate::transport::{build_cdp_router, build_native_router};
use crate::upstream::dispatch::spawn_reaper;
use crate::upstream::link::serve_ext;

/// A bridge with all three listeners bound and serving.
pub struct Bridge {
    pub state: Arc<BridgeState>,
    pub native_addr: SocketAddr,
    pub cdp_addr: SocketAddr,
    pub ext_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Bind the native, devtools and extension listeners and start serving.
    /// A failed bind at startup is fatal.
    pub async fn bind(config: BridgeConfig) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();
        let state = Arc::new(BridgeState::new(config.clone(), shutdown.clone()));

        let native = TcpListener::bind((config.host.as_str(), config.native_port))
            .await
            .context("bind native endpoint")?;
        let cdp = TcpListener::bind((config.host.as_str(), config.cdp_port))
            .await
            .context("bind devtools endpoint")?;
        let ext = TcpListener::bind((config.host.as_str(), config.ext_port))
            .await
            .context("bind extension endpoint")?;

        let native_addr = native.local_addr().context("native local addr")?;
        let cdp_addr = cdp.local_addr().context("devtools local addr")?;
        let ext_addr = ext.local_addr().context("extension local addr")?;

        let mut tasks = Vec::new();

        let native_router = build_native_router(Arc::clone(&state));
        let native_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let _ = axum::serve(native, native_router)
                .with_graceful_shutdown(native_shutdown.cancelled_owned())
                .await;
        }));

        let cdp_router = build_cdp_router(Arc::clone(&state));
        let cdp_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let _ = axum::serve(cdp, cdp_router)
                .with_graceful_shutdown(cdp_shutdown.cancelled_owned())
                .await;
        }));

        tasks.push(tokio::spawn(serve_ext(Arc::clone(&state), ext)));
        tasks.push(spawn_reaper(Arc::clone(&state)));

        info!(%native_addr, %cdp_addr, %ext_addr, "bridge listening");
        Ok(Self { state, native_addr, cdp_addr, ext_addr, tasks })
    }

    /// Begin shutdown: stop accepting registrations and cancel every task.
    pub fn shutdown(&self) {
        self.state.registry.shutdown();
        self.state.shutdown.cancel();
    }

    /// Wait for all serving tasks to finish.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Run the bridge until Ctrl-C.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let bridge = Bridge::bind(config).await?;
    tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
    info!("shutting down");
    bridge.shutdown();
    bridge.join().await;
    Ok(())
}
