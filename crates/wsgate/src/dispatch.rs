// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound dispatch: `list`, `push` and `broadcast` per room, plus the
//! `<namespace>.<room>.<op>` method router used by the control plane.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use crate::connection::SendError;
use crate::error::ErrorCode;
use crate::room::{Room, RoomRegistry};
use crate::state::epoch_ms;

// -- Message ids --------------------------------------------------------------

/// Source of envelope ids. Ids are unique for the process lifetime and never 0.
pub trait MessageIds: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Counts down from the wall clock in milliseconds, reseeding from the clock
/// instead of ever reaching 0.
pub struct ClockIds {
    next: AtomicU64,
}

impl ClockIds {
    pub fn new() -> Self {
        Self::seeded(epoch_ms())
    }

    pub fn seeded(seed: u64) -> Self {
        Self { next: AtomicU64::new(seed.max(1)) }
    }
}

impl Default for ClockIds {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIds for ClockIds {
    fn next_id(&self) -> u64 {
        let prev = self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
            Some(if cur <= 1 { epoch_ms().max(2) } else { cur - 1 })
        });
        // The closure always returns Some.
        match prev {
            Ok(id) | Err(id) => id,
        }
    }
}

/// 1, 2, 3, ... for deterministic tests.
#[derive(Default)]
pub struct SequentialIds {
    last: AtomicU64,
}

impl MessageIds for SequentialIds {
    fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// -- Wire types ---------------------------------------------------------------

/// Outbound notification frame.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> Envelope<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }

    pub fn to_message(&self) -> Result<Message, DispatchError> {
        let text = serde_json::to_string(self)
            .map_err(|e| DispatchError::Internal(format!("encoding envelope: {e}")))?;
        Ok(Message::text(text))
    }
}

/// One actor id or many.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ActorTarget {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub actor_id: ActorTarget,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A push that reached an outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub actor_id: String,
    pub id: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    One(Result<Delivery, DispatchError>),
    Many(Vec<Result<Delivery, DispatchError>>),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

// -- Errors -------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    ClientNotConnected { actor_id: String },
    SendQueueFull { actor_id: String },
    MethodNotFound { method: String },
    InvalidParams(String),
    Internal(String),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ClientNotConnected { .. } => ErrorCode::ClientNotConnected,
            Self::SendQueueFull { .. } => ErrorCode::SendQueueFull,
            Self::MethodNotFound { .. } => ErrorCode::MethodNotFound,
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The targeted actor, for per-id failures.
    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Self::ClientNotConnected { actor_id } | Self::SendQueueFull { actor_id } => {
                Some(actor_id)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientNotConnected { actor_id } => write!(f, "client not connected: {actor_id}"),
            Self::SendQueueFull { actor_id } => write!(f, "send queue full: {actor_id}"),
            Self::MethodNotFound { method } => write!(f, "method not found: {method}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

// -- Dispatch -----------------------------------------------------------------

/// Dispatch operations bound to one room.
pub struct RoomDispatch {
    room: Arc<Room>,
    ids: Arc<dyn MessageIds>,
}

impl RoomDispatch {
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Actor ids of open connections, in set order. Duplicates are kept.
    pub fn list(&self) -> Vec<String> {
        self.room
            .snapshot()
            .iter()
            .filter(|c| c.is_open())
            .map(|c| c.actor_id().to_owned())
            .collect()
    }

    pub fn push(&self, req: &PushRequest) -> PushOutcome {
        match req.actor_id {
            ActorTarget::One(ref actor_id) => {
                PushOutcome::One(self.push_one(actor_id, &req.method, &req.params))
            }
            ActorTarget::Many(ref actor_ids) => PushOutcome::Many(
                actor_ids.iter().map(|a| self.push_one(a, &req.method, &req.params)).collect(),
            ),
        }
    }

    /// Send to the first open connection of `actor_id`.
    pub fn push_one(
        &self,
        actor_id: &str,
        method: &str,
        params: &Value,
    ) -> Result<Delivery, DispatchError> {
        for conn in self.room.snapshot() {
            if conn.actor_id() != actor_id || !conn.is_open() {
                continue;
            }
            let id = self.ids.next_id();
            let msg = Envelope::new(id, method, params).to_message()?;
            match conn.send(msg) {
                Ok(()) => {
                    tracing::debug!(
                        path = %self.room.path(),
                        conn_id = %conn.id(),
                        actor_id,
                        id,
                        method,
                        "pushed"
                    );
                    return Ok(Delivery { actor_id: actor_id.to_owned(), id });
                }
                Err(SendError::Full) => {
                    tracing::warn!(
                        path = %self.room.path(),
                        conn_id = %conn.id(),
                        actor_id,
                        code = %ErrorCode::SendQueueFull,
                        "push dropped"
                    );
                    return Err(DispatchError::SendQueueFull { actor_id: actor_id.to_owned() });
                }
                // Closed since the snapshot; try the next match.
                Err(SendError::Closed) => continue,
            }
        }
        Err(DispatchError::ClientNotConnected { actor_id: actor_id.to_owned() })
    }

    /// Send one envelope, with one id, to every open connection.
    pub fn broadcast(&self, method: &str, params: &Value) -> Result<BroadcastReport, DispatchError> {
        let id = self.ids.next_id();
        let msg = Envelope::new(id, method, params).to_message()?;

        let mut report = BroadcastReport::default();
        for conn in self.room.snapshot() {
            if !conn.is_open() {
                continue;
            }
            match conn.send(msg.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        path = %self.room.path(),
                        conn_id = %conn.id(),
                        err = ?e,
                        "broadcast send failed"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            path = %self.room.path(),
            id,
            method,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast"
        );
        Ok(report)
    }
}

/// Entry point for outbound calls from other components.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
    ids: Arc<dyn MessageIds>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RoomRegistry>, ids: Arc<dyn MessageIds>) -> Self {
        Self { registry, ids }
    }

    pub fn room(&self, namespace: &str, name: &str) -> Option<RoomDispatch> {
        self.registry.room(namespace, name).map(|room| self.bind(room))
    }

    fn bind(&self, room: Arc<Room>) -> RoomDispatch {
        RoomDispatch { room, ids: Arc::clone(&self.ids) }
    }

    /// Route `<namespace>.<room>.<op>` and return the JSON result.
    pub fn call(&self, method: &str, params: Value) -> Result<Value, DispatchError> {
        let not_found = || DispatchError::MethodNotFound { method: method.to_owned() };
        let (prefix, op) = method.rsplit_once('.').ok_or_else(not_found)?;
        let room = self.registry.room_by_prefix(prefix).ok_or_else(not_found)?;
        let dispatch = self.bind(room);

        match op {
            "list" => Ok(json!(dispatch.list())),
            "push" => {
                let req: PushRequest = parse_params(params)?;
                match dispatch.push(&req) {
                    PushOutcome::One(result) => Ok(json!(result?)),
                    PushOutcome::Many(results) => {
                        Ok(Value::Array(results.iter().map(push_result_json).collect()))
                    }
                }
            }
            "broadcast" => {
                let req: BroadcastRequest = parse_params(params)?;
                Ok(json!(dispatch.broadcast(&req.method, &req.params)?))
            }
            _ => Err(not_found()),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, DispatchError> {
    serde_json::from_value(params).map_err(|e| DispatchError::InvalidParams(e.to_string()))
}

fn push_result_json(result: &Result<Delivery, DispatchError>) -> Value {
    match result {
        Ok(delivery) => json!(delivery),
        Err(e) => json!({
            "actorId": e.actor_id(),
            "error": {
                "code": e.code().rpc_code(),
                "type": e.code().as_str(),
                "message": e.to_string(),
            }
        }),
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
