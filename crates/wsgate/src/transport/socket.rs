// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection task: owns the WebSocket and drains the outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;
use crate::connection::{CloseReason, Connection};
use crate::room::Room;
use crate::state::GatewayState;

/// Upper bound on the close handshake during shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

fn going_away() -> Message {
    Message::Close(Some(CloseFrame { code: CloseCode::Away, reason: "going away".into() }))
}

/// Finish the upgrade, register the connection, and run it to completion.
pub async fn accept(
    state: Arc<GatewayState>,
    room: Arc<Room>,
    identity: Identity,
    peer: SocketAddr,
    on_upgrade: OnUpgrade,
) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::debug!(%peer, path = %room.path(), err = %e, "upgrade did not complete");
            return;
        }
    };
    let mut ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

    if state.rooms_shutdown.is_cancelled() {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
        return;
    }

    let (conn, outbound) = Connection::new(identity, state.config.outbound_capacity);
    room.register(Arc::clone(&conn));
    tracing::info!(
        %peer,
        path = %room.path(),
        conn_id = %conn.id(),
        actor_id = %conn.actor_id(),
        session_id = conn.identity().session_id.as_deref().unwrap_or(""),
        "client connected"
    );

    let reason = run(&room, &conn, outbound, ws, state.rooms_shutdown.clone()).await;
    tracing::info!(
        %peer,
        path = %room.path(),
        conn_id = %conn.id(),
        actor_id = %conn.actor_id(),
        %reason,
        "client disconnected"
    );
}

/// Pump frames until the peer leaves, the connection is closed locally, or
/// `shutdown` fires. The connection leaves its room before the close handshake.
pub async fn run<S>(
    room: &Room,
    conn: &Arc<Connection>,
    mut outbound: mpsc::Receiver<Message>,
    ws: WebSocketStream<S>,
    shutdown: CancellationToken,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            _ = conn.closed() => break conn.close_reason().unwrap_or(CloseReason::Shutdown),
            _ = shutdown.cancelled() => break CloseReason::Shutdown,
            msg = outbound.recv() => {
                let Some(msg) = msg else { break CloseReason::Error };
                // A peer that stops reading must not pin the task past eviction or shutdown.
                tokio::select! {
                    sent = sink.send(msg) => if let Err(e) = sent {
                        tracing::debug!(conn_id = %conn.id(), err = %e, "websocket write failed");
                        break CloseReason::Error;
                    },
                    _ = conn.closed() => break conn.close_reason().unwrap_or(CloseReason::Shutdown),
                    _ = shutdown.cancelled() => break CloseReason::Shutdown,
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Pong(_))) => conn.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break CloseReason::Peer,
                // Inbound data is not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn.id(), err = %e, "websocket read failed");
                    break CloseReason::Error;
                }
            },
        }
    };

    // First reason wins: an eviction or shutdown that raced the loop keeps its own.
    conn.close(reason);
    let reason = conn.close_reason().unwrap_or(reason);
    outbound.close();
    room.unregister(conn.id(), reason);

    match reason {
        CloseReason::Shutdown => {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
                let _ = sink.send(going_away()).await;
                let _ = sink.close().await;
            })
            .await;
        }
        // Complete the close handshake the peer started.
        CloseReason::Peer => {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
        // Terminated: drop the socket without a close frame.
        CloseReason::Timeout | CloseReason::Error => {}
    }

    reason
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
