// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway lifecycle: build from configuration, start listeners and liveness
//! monitors, and shut everything down in order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::{join_all, try_join_all};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::auth::{JwtVerifier, TokenVerifier};
use crate::config::GatewayConfig;
use crate::dispatch::{ClockIds, Dispatcher, MessageIds};
use crate::liveness::spawn_liveness_monitor;
use crate::room::RoomRegistry;
use crate::state::GatewayState;
use crate::transport;

/// A configured gateway that has not bound any socket yet.
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Gateway with a JWT verifier built from `config.auth`.
    pub fn from_config(config: GatewayConfig) -> anyhow::Result<Self> {
        let verifier = Arc::new(JwtVerifier::new(&config.auth)?);
        Self::new(config, verifier)
    }

    pub fn new(config: GatewayConfig, verifier: Arc<dyn TokenVerifier>) -> anyhow::Result<Self> {
        Self::with_ids(config, verifier, Arc::new(ClockIds::new()))
    }

    pub fn with_ids(
        config: GatewayConfig,
        verifier: Arc<dyn TokenVerifier>,
        ids: Arc<dyn MessageIds>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let state = GatewayState::build(config, verifier, ids)?;
        Ok(Self { state: Arc::new(state) })
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Bind listeners, then start accept loops and one liveness monitor per
    /// connection set.
    pub async fn start(self) -> anyhow::Result<RunningGateway> {
        let state = self.state;
        let config = &state.config;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("binding upgrade listener on {addr}: {e}"))?;
        let local_addr = listener.local_addr()?;

        let control_listener = match config.control {
            Some(ref control) => {
                let addr = format!("{}:{}", control.host, control.port);
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|e| anyhow::anyhow!("binding control listener on {addr}: {e}"))?;
                Some(listener)
            }
            None => None,
        };
        let control_addr = control_listener.as_ref().map(|l| l.local_addr()).transpose()?;

        let monitors = state
            .registry
            .sets()
            .iter()
            .map(|set| {
                spawn_liveness_monitor(
                    Arc::clone(set),
                    config.ping_interval(),
                    state.rooms_shutdown.clone(),
                )
            })
            .collect();

        let mut listeners = vec![tokio::spawn(transport::serve_upgrades(listener, Arc::clone(&state)))];
        if let Some(listener) = control_listener {
            listeners.push(tokio::spawn(transport::serve_control(listener, Arc::clone(&state))));
        }

        tracing::info!(
            addr = %local_addr,
            rooms = state.registry.rooms().len(),
            sets = state.registry.sets().len(),
            ping_interval_ms = config.ping_interval,
            "wsgate listening"
        );
        if let Some(addr) = control_addr {
            tracing::info!(addr = %addr, "control plane listening");
        }

        Ok(RunningGateway { state, local_addr, control_addr, listeners, monitors })
    }
}

/// A started gateway. Dropping it leaves the tasks running; call
/// [`RunningGateway::stop`] for an orderly shutdown.
pub struct RunningGateway {
    state: Arc<GatewayState>,
    local_addr: SocketAddr,
    control_addr: Option<SocketAddr>,
    listeners: Vec<JoinHandle<anyhow::Result<()>>>,
    monitors: Vec<JoinHandle<()>>,
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.state.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.dispatcher
    }

    /// `ws://` URL of a room on the bound address.
    pub fn room_url(&self, namespace: &str, room: &str) -> String {
        format!("ws://{}{}", self.local_addr, self.state.config.room_path(namespace, room))
    }

    /// Close every room, then every listener. Resolves once all tasks are done.
    pub async fn stop(self) -> anyhow::Result<()> {
        tracing::info!("shutting down");

        // Rooms first: every set closes concurrently and monitors stop.
        self.state.rooms_shutdown.cancel();
        join_all(self.state.registry.sets().iter().map(|set| set.close())).await;
        for result in join_all(self.monitors).await {
            if let Err(e) = result {
                tracing::warn!(err = %e, "liveness monitor failed");
            }
        }

        // Then listeners, surfacing the first failure.
        self.state.listeners_shutdown.cancel();
        try_join_all(self.listeners.into_iter().map(|handle| async move { handle.await? })).await?;

        tracing::info!("shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
