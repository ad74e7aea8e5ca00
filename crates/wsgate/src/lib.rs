// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wsgate: authenticated WebSocket room gateway.

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod liveness;
pub mod room;
pub mod state;
pub mod test_support;
pub mod transport;

use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::gateway::Gateway;

/// Install the global subscriber. `format` is `json` or anything else for text.
pub fn init_tracing(format: &str, level: &str) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the gateway until SIGTERM or SIGINT, then shut down in order.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let running = Gateway::from_config(config)?.start().await?;
    shutdown_signal().await;
    running.stop().await
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    tokio::select! {
        _ = async {
            if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
        } => {
            tracing::info!("received SIGTERM");
        }
        _ = async {
            if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
        } => {
            tracing::info!("received SIGINT");
        }
    }
}
