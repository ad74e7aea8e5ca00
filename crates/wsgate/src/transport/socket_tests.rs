// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use super::run;
use crate::auth::Identity;
use crate::config::GatewayConfig;
use crate::connection::{CloseReason, Connection, Liveness};
use crate::room::{Room, RoomRegistry};

struct Harness {
    room: Arc<Room>,
    conn: Arc<Connection>,
    client: WebSocketStream<DuplexStream>,
    shutdown: CancellationToken,
    task: JoinHandle<CloseReason>,
}

async fn harness() -> anyhow::Result<Harness> {
    let registry = RoomRegistry::from_config(&GatewayConfig::new(0, vec!["test".to_owned()]))?;
    let room = registry.room("wss", "test").ok_or_else(|| anyhow::anyhow!("room"))?;

    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    let (conn, outbound) = Connection::new(
        Identity { actor_id: "1000".to_owned(), session_id: None },
        8,
    );
    room.register(Arc::clone(&conn));

    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let room = Arc::clone(&room);
        let conn = Arc::clone(&conn);
        let shutdown = shutdown.clone();
        async move { run(&room, &conn, outbound, server, shutdown).await }
    });

    Ok(Harness { room, conn, client, shutdown, task })
}

async fn next_frame(client: &mut WebSocketStream<DuplexStream>) -> anyhow::Result<Message> {
    match tokio::time::timeout(Duration::from_secs(5), client.next()).await? {
        Some(frame) => Ok(frame?),
        None => anyhow::bail!("stream ended"),
    }
}

#[tokio::test]
async fn queued_frames_reach_the_client() -> anyhow::Result<()> {
    let mut h = harness().await?;

    h.conn.send(Message::text("hello")).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    assert_eq!(next_frame(&mut h.client).await?, Message::text("hello"));

    h.client.close(None).await?;
    assert_eq!(h.task.await?, CloseReason::Peer);
    assert!(h.room.connections().is_empty());
    Ok(())
}

#[tokio::test]
async fn pong_marks_connection_alive() -> anyhow::Result<()> {
    let mut h = harness().await?;

    h.conn.ping();
    assert_eq!(h.conn.liveness(), Liveness::Unconfirmed);
    let ping = next_frame(&mut h.client).await?;
    assert!(matches!(ping, Message::Ping(_)), "expected ping, got {ping:?}");

    h.client.send(Message::Pong(bytes::Bytes::new())).await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.conn.liveness() != Liveness::Alive {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    h.shutdown.cancel();
    h.task.await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_sends_going_away() -> anyhow::Result<()> {
    let mut h = harness().await?;

    h.shutdown.cancel();
    match next_frame(&mut h.client).await? {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => anyhow::bail!("expected close frame, got {other:?}"),
    }

    assert_eq!(h.task.await?, CloseReason::Shutdown);
    assert!(!h.conn.is_open());
    assert!(h.room.connections().is_empty());
    Ok(())
}

#[tokio::test]
async fn eviction_terminates_without_close_frame() -> anyhow::Result<()> {
    let mut h = harness().await?;

    h.conn.close(CloseReason::Timeout);
    assert_eq!(h.task.await?, CloseReason::Timeout);

    let frame = tokio::time::timeout(Duration::from_secs(5), h.client.next()).await?;
    assert!(!matches!(frame, Some(Ok(Message::Close(_)))), "unexpected close frame: {frame:?}");
    assert!(h.room.connections().is_empty());
    Ok(())
}

#[tokio::test]
async fn inbound_text_is_ignored() -> anyhow::Result<()> {
    let mut h = harness().await?;

    h.client.send(Message::text("ignored")).await?;
    h.conn.send(Message::text("still here")).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    assert_eq!(next_frame(&mut h.client).await?, Message::text("still here"));
    assert!(h.conn.is_open());

    h.shutdown.cancel();
    h.task.await?;
    Ok(())
}

/// Queue a frame far larger than the duplex buffer so the write blocks on a
/// client that never reads.
async fn stall_writer(h: &Harness) -> anyhow::Result<()> {
    h.conn.send(Message::text("x".repeat(1 << 20))).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.task.is_finished());
    Ok(())
}

#[tokio::test]
async fn eviction_interrupts_blocked_write() -> anyhow::Result<()> {
    let h = harness().await?;
    stall_writer(&h).await?;

    h.conn.close(CloseReason::Timeout);
    let reason = tokio::time::timeout(Duration::from_secs(5), h.task).await??;
    assert_eq!(reason, CloseReason::Timeout);
    assert!(h.room.connections().is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_blocked_write_and_unregisters_first() -> anyhow::Result<()> {
    let h = harness().await?;
    stall_writer(&h).await?;

    h.shutdown.cancel();

    // The close frame cannot be written either, so the task waits out the close
    // timeout, but the connection has already left its room.
    tokio::time::timeout(Duration::from_secs(1), async {
        while !h.room.connections().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert!(!h.task.is_finished());

    let reason = tokio::time::timeout(Duration::from_secs(5), h.task).await??;
    assert_eq!(reason, CloseReason::Shutdown);
    Ok(())
}
