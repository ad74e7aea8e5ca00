// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control plane: the dispatch API over JSON-RPC 2.0, plus health and room
//! introspection.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::dispatch::DispatchError;
use crate::error::ErrorCode;
use crate::state::GatewayState;
use crate::transport::auth::auth_layer;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub rooms: usize,
    pub connections: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct RoomInfo {
    pub path: String,
    pub namespace: String,
    pub room: String,
    pub connections: usize,
    pub actors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: RpcErrorData,
}

#[derive(Debug, Serialize)]
pub struct RpcErrorData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "actorId", skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Value, code: ErrorCode, message: String, actor_id: Option<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code: code.rpc_code(),
                message,
                data: RpcErrorData { kind: code.as_str(), actor_id },
            }),
        }
    }

    fn from_dispatch_error(id: Value, e: &DispatchError) -> Self {
        Self::err(id, e.code(), e.to_string(), e.actor_id().map(str::to_owned))
    }
}

pub async fn health(State(s): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        rooms: s.registry.rooms().len(),
        connections: s.registry.connection_count(),
        uptime_secs: s.started_at.elapsed().as_secs(),
    })
}

pub async fn rooms(State(s): State<Arc<GatewayState>>) -> Json<Vec<RoomInfo>> {
    let rooms = s
        .registry
        .rooms()
        .iter()
        .map(|room| {
            let actors: Vec<String> = room
                .snapshot()
                .iter()
                .filter(|c| c.is_open())
                .map(|c| c.actor_id().to_owned())
                .collect();
            RoomInfo {
                path: room.path().to_owned(),
                namespace: room.namespace().to_owned(),
                room: room.name().to_owned(),
                connections: actors.len(),
                actors,
            }
        })
        .collect();
    Json(rooms)
}

/// `POST /api/v1/rpc`. Always answers 200 with a JSON-RPC response body.
pub async fn rpc(State(s): State<Arc<GatewayState>>, body: Bytes) -> Json<RpcResponse> {
    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            let message = format!("invalid request: {e}");
            return Json(RpcResponse::err(Value::Null, ErrorCode::InvalidParams, message, None));
        }
    };
    if req.jsonrpc != "2.0" {
        let message = format!("unsupported jsonrpc version: {}", req.jsonrpc);
        return Json(RpcResponse::err(req.id, ErrorCode::InvalidParams, message, None));
    }

    match s.dispatcher.call(&req.method, req.params) {
        Ok(result) => Json(RpcResponse::ok(req.id, result)),
        Err(e) => {
            tracing::debug!(method = %req.method, code = %e.code(), err = %e, "rpc failed");
            Json(RpcResponse::from_dispatch_error(req.id, &e))
        }
    }
}

/// Build the control router. Everything but health sits behind the bearer
/// token when one is configured.
pub fn build_control_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/rooms", get(rooms))
        .route("/api/v1/rpc", post(rpc))
        .fallback(|| async { ErrorCode::MethodNotFound.to_http_response("no such route") })
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
