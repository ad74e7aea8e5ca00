// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room membership events, fanned out over a broadcast channel.

use serde::Serialize;

use crate::connection::{CloseReason, ConnId};

/// Channel capacity for [`GatewayEvent`] subscribers.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Connected {
        path: String,
        conn_id: ConnId,
        actor_id: String,
    },
    Disconnected {
        path: String,
        conn_id: ConnId,
        actor_id: String,
        reason: CloseReason,
    },
}

impl GatewayEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::Connected { path, .. } | Self::Disconnected { path, .. } => path,
        }
    }

    pub fn actor_id(&self) -> &str {
        match self {
            Self::Connected { actor_id, .. } | Self::Disconnected { actor_id, .. } => actor_id,
        }
    }
}
