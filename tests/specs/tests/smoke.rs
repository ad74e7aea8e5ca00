// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary smoke tests: spawn the real `wsgate` binary and drive it over
//! WebSocket and the control plane.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use wsgate::test_support::TokenMinter;
use wsgate_specs::{run_to_exit, WsgateProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn next_text(ws: &mut Client) -> anyhow::Result<Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        match msg {
            Message::Text(t) => return Ok(serde_json::from_str(t.as_str())?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("expected text ws message, got: {other:?}"),
        }
    }
}

// -- Health -------------------------------------------------------------------

#[tokio::test]
async fn health_reports_running() -> anyhow::Result<()> {
    let wsgate = WsgateProcess::start()?;
    wsgate.wait_healthy(TIMEOUT).await?;

    let health: Value =
        reqwest::get(format!("{}/api/v1/health", wsgate.control_url())).await?.json().await?;
    assert_eq!(health["status"], "running");
    assert_eq!(health["rooms"], 1);
    assert_eq!(health["connections"], 0);
    Ok(())
}

// -- Push ---------------------------------------------------------------------

#[tokio::test]
async fn push_over_rpc_reaches_socket() -> anyhow::Result<()> {
    let wsgate = WsgateProcess::start()?;
    wsgate.wait_healthy(TIMEOUT).await?;

    let minter = TokenMinter::new()?;
    let url = wsgate.ws_url("wss", "test", &minter.token_for("1000"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
    wsgate.wait_connections(1, TIMEOUT).await?;

    let reply = wsgate
        .rpc(
            "wss.test.push",
            json!({ "actorId": "1000", "method": "test", "params": { "test": true } }),
        )
        .await?;
    let envelope = next_text(&mut ws).await?;

    assert_eq!(envelope["jsonrpc"], "2.0");
    assert_eq!(envelope["method"], "test");
    assert_eq!(envelope["params"], json!({ "test": true }));
    assert_eq!(reply["result"], json!({ "actorId": "1000", "id": envelope["id"] }));
    Ok(())
}

#[tokio::test]
async fn unknown_room_and_bad_token_are_refused() -> anyhow::Result<()> {
    let wsgate = WsgateProcess::start()?;
    wsgate.wait_healthy(TIMEOUT).await?;

    let minter = TokenMinter::new()?;
    let stranger = TokenMinter::from_seed([9u8; 32])?;

    let url = wsgate.ws_url("wss", "other", &minter.token_for("1000"));
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
    let url = wsgate.ws_url("wss", "test", &stranger.token_for("1000"));
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    let reply = wsgate.rpc("wss.test.list", Value::Null).await?;
    assert_eq!(reply["result"], json!([]));
    Ok(())
}

// -- Configuration ------------------------------------------------------------

#[tokio::test]
async fn config_file_serves_every_namespace() -> anyhow::Result<()> {
    let minter = TokenMinter::new()?;
    let wsgate = WsgateProcess::build()
        .config_file(json!({
            "server": { "port": 0 },
            "rooms": ["lobby"],
            "namespace": ["wss", "ops"],
            "auth": { "keys": [serde_json::to_value(minter.jwk())?] },
        }))
        .spawn()?;
    wsgate.wait_healthy(TIMEOUT).await?;

    let url = wsgate.ws_url("ops", "lobby", &minter.token_for("7"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
    wsgate.wait_connections(1, TIMEOUT).await?;

    let reply = wsgate.rpc("ops.lobby.broadcast", json!({ "method": "hello" })).await?;
    assert_eq!(reply["result"], json!({ "delivered": 1, "failed": 0 }));
    assert_eq!(next_text(&mut ws).await?["method"], "hello");

    let reply = wsgate.rpc("wss.lobby.list", Value::Null).await?;
    assert_eq!(reply["result"], json!([]));
    Ok(())
}

#[test]
fn missing_rooms_exits_with_usage_error() -> anyhow::Result<()> {
    let minter = TokenMinter::new()?;
    let key = minter.jwk().x.unwrap_or_default();
    let code = run_to_exit(&["--port", "0", "--jwt-ed25519-key", &key])?;
    assert_eq!(code, Some(2));
    Ok(())
}

#[tokio::test]
async fn control_token_is_required() -> anyhow::Result<()> {
    let wsgate = WsgateProcess::build().control_token("s3cret").spawn()?;
    wsgate.wait_healthy(TIMEOUT).await?;

    let resp = reqwest::get(format!("{}/api/v1/rooms", wsgate.control_url())).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let reply = wsgate.rpc("wss.test.list", Value::Null).await?;
    assert_eq!(reply["result"], json!([]));
    Ok(())
}

// -- Shutdown -----------------------------------------------------------------

#[tokio::test]
async fn sigterm_closes_clients_and_exits_cleanly() -> anyhow::Result<()> {
    let mut wsgate = WsgateProcess::start()?;
    wsgate.wait_healthy(TIMEOUT).await?;

    let minter = TokenMinter::new()?;
    let url = wsgate.ws_url("wss", "test", &minter.token_for("1000"));
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
    wsgate.wait_connections(1, TIMEOUT).await?;

    wsgate.terminate()?;

    match tokio::time::timeout(TIMEOUT, ws.next()).await? {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Away),
        Some(Ok(Message::Close(None))) | None | Some(Err(_)) => {}
        Some(Ok(other)) => anyhow::bail!("unexpected frame after SIGTERM: {other:?}"),
    }

    let status = wsgate.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "wsgate exited with {status}");
    Ok(())
}
