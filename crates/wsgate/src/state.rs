// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::dispatch::{Dispatcher, MessageIds};
use crate::room::RoomRegistry;

/// Shared gateway state, handed to the upgrade router and the control plane.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: Arc<RoomRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub dispatcher: Dispatcher,
    /// Cancelled first on shutdown: closes rooms and stops liveness monitors.
    pub rooms_shutdown: CancellationToken,
    /// Cancelled once rooms are drained: stops the accept loops.
    pub listeners_shutdown: CancellationToken,
    pub started_at: Instant,
}

impl GatewayState {
    /// Build the room table and dispatcher for `config`.
    pub fn build(
        config: GatewayConfig,
        verifier: Arc<dyn TokenVerifier>,
        ids: Arc<dyn MessageIds>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(RoomRegistry::from_config(&config)?);
        let dispatcher = Dispatcher::new(Arc::clone(&registry), ids);
        Ok(Self {
            config,
            registry,
            verifier,
            dispatcher,
            rooms_shutdown: CancellationToken::new(),
            listeners_shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        })
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
