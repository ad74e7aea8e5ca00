// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP-to-WebSocket handoff.
//!
//! A request is checked in a fixed order: path, credential presence,
//! credential validity, then the WebSocket handshake headers. Any failure is
//! returned to hyper as a service error, which drops the TCP connection
//! without writing a response.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use hyper::header::{self, HeaderMap};
use hyper::{Method, Request, Response, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::auth::Identity;
use crate::error::ErrorCode;
use crate::room::Room;
use crate::state::GatewayState;
use crate::transport::auth::access_token;
use crate::transport::socket;

/// Why an upgrade was refused. Only ever logged.
#[derive(Debug)]
pub struct Rejection {
    pub code: ErrorCode,
    pub detail: String,
}

impl Rejection {
    fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self { code, detail: detail.into() }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for Rejection {}

/// A request that passed every check.
#[derive(Debug)]
pub struct Accepted {
    pub room: Arc<Room>,
    pub identity: Identity,
    pub accept_key: String,
}

/// Run the checks without touching the socket.
pub fn route<B>(state: &GatewayState, req: &Request<B>) -> Result<Accepted, Rejection> {
    let path = req.uri().path();
    let room = state
        .registry
        .resolve(path)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidPath, format!("no room at {path}")))?;

    let token = access_token(req.uri().query()).ok_or_else(|| {
        Rejection::new(ErrorCode::SecurityViolation, "access_token query parameter missing")
    })?;

    let identity = state
        .verifier
        .verify(&token)
        .map_err(|e| Rejection::new(ErrorCode::SecurityViolation, e.to_string()))?;

    let accept_key = handshake_accept_key(req.method(), req.headers())?;

    Ok(Accepted { room, identity, accept_key })
}

/// Validate the RFC 6455 opening handshake and derive `Sec-WebSocket-Accept`.
pub fn handshake_accept_key(method: &Method, headers: &HeaderMap) -> Result<String, Rejection> {
    let bad = |what: &str| Rejection::new(ErrorCode::BadHandshake, what.to_owned());

    if method != Method::GET {
        return Err(bad("method must be GET"));
    }
    let header_str = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    let upgrade = header_str(header::UPGRADE).ok_or_else(|| bad("Upgrade header missing"))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(bad("Upgrade header is not websocket"));
    }

    let connection =
        header_str(header::CONNECTION).ok_or_else(|| bad("Connection header missing"))?;
    if !connection.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")) {
        return Err(bad("Connection header does not include upgrade"));
    }

    if header_str(header::SEC_WEBSOCKET_VERSION) != Some("13") {
        return Err(bad("Sec-WebSocket-Version must be 13"));
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or_else(|| bad("Sec-WebSocket-Key header missing"))?;
    Ok(derive_accept_key(key.as_bytes()))
}

/// hyper service entry point for the upgrade listener.
pub fn handle(
    state: Arc<GatewayState>,
    peer: SocketAddr,
    mut req: Request<hyper::body::Incoming>,
) -> Result<Response<Body>, Rejection> {
    let accepted = match route(&state, &req) {
        Ok(accepted) => accepted,
        Err(rejection) => {
            tracing::warn!(
                %peer,
                path = %req.uri().path(),
                code = %rejection.code,
                reason = %rejection.detail,
                "upgrade rejected"
            );
            return Err(rejection);
        }
    };

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accepted.accept_key)
        .body(Body::empty())
        .map_err(|e| Rejection::new(ErrorCode::Internal, e.to_string()))?;

    let on_upgrade = hyper::upgrade::on(&mut req);
    let tracker = accepted.room.connections().tracker().clone();
    tracker.spawn(socket::accept(state, accepted.room, accepted.identity, peer, on_upgrade));

    Ok(response)
}

#[cfg(test)]
#[path = "upgrade_tests.rs"]
mod tests;
