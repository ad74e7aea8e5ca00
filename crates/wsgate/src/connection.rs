// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single authenticated WebSocket session as seen by rooms and dispatch.
//!
//! The socket itself is owned by its connection task; everything else talks to
//! it through the bounded outbound queue held here.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Identity;

/// Connection identifier, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ping state of a connection.
///
/// `Alive` after a pong (or at registration); `Unconfirmed` once a ping has
/// gone out without an answer yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Unconfirmed,
}

/// Outcome of a liveness sweep step on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// Flag was `Alive`; now `Unconfirmed` and a ping was queued.
    Pinged,
    /// Flag was `Alive` but the ping could not be queued.
    PingDropped,
    /// Flag was still `Unconfirmed` from the previous sweep.
    Expired,
}

/// Why a connection left its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The peer closed or the stream ended.
    Peer,
    /// Protocol or I/O error on the socket.
    Error,
    /// No pong within two ping intervals.
    Timeout,
    /// Gateway shutdown.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to enqueue an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Closed,
    Full,
}

pub struct Connection {
    id: ConnId,
    identity: Identity,
    liveness: Mutex<Liveness>,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
    close_reason: OnceLock<CloseReason>,
}

impl Connection {
    /// Build a connection and the receiving end of its outbound queue.
    pub fn new(identity: Identity, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: ConnId::new(),
            identity,
            liveness: Mutex::new(Liveness::Alive),
            outbound: tx,
            closed: CancellationToken::new(),
            close_reason: OnceLock::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn actor_id(&self) -> &str {
        &self.identity.actor_id
    }

    /// Open until closed locally or until the connection task drops its queue.
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.outbound.is_closed()
    }

    /// Enqueue a frame without waiting for queue space.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    pub fn liveness(&self) -> Liveness {
        *self.liveness.lock()
    }

    /// Record a pong.
    pub fn mark_alive(&self) {
        *self.liveness.lock() = Liveness::Alive;
    }

    /// One sweep step: expire if the last ping went unanswered, else ping again.
    ///
    /// The flag is flipped under the lock so a pong racing the sweep either
    /// lands before (and is consumed by this ping) or after (and confirms it).
    pub fn ping(&self) -> PingOutcome {
        let mut state = self.liveness.lock();
        match *state {
            Liveness::Unconfirmed => PingOutcome::Expired,
            Liveness::Alive => {
                *state = Liveness::Unconfirmed;
                drop(state);
                match self.send(Message::Ping(bytes::Bytes::new())) {
                    Ok(()) => PingOutcome::Pinged,
                    Err(_) => PingOutcome::PingDropped,
                }
            }
        }
    }

    /// Mark the connection closed. The first reason wins.
    pub fn close(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.closed.cancel();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("liveness", &self.liveness())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
