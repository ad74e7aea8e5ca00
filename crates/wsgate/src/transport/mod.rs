// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listeners: the public upgrade endpoint and the loopback control plane.

pub mod auth;
pub mod control;
pub mod socket;
pub mod upgrade;

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::task::TaskTracker;

use crate::state::GatewayState;

/// Accept loop for the upgrade listener. Runs until the listener token is
/// cancelled, then waits for in-flight HTTP exchanges to finish.
pub async fn serve_upgrades(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let shutdown = state.listeners_shutdown.clone();
    let exchanges = TaskTracker::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accept = listener.accept() => match accept {
                Ok((stream, peer)) => {
                    exchanges.spawn(serve_exchange(stream, peer, Arc::clone(&state)));
                }
                Err(e) => {
                    tracing::warn!(err = %e, "upgrade listener accept error");
                }
            },
        }
    }

    drop(listener);
    exchanges.close();
    exchanges.wait().await;
    tracing::debug!("upgrade listener stopped");
    Ok(())
}

/// One HTTP/1 connection up to (and including) the 101 response.
async fn serve_exchange(stream: TcpStream, peer: SocketAddr, state: Arc<GatewayState>) {
    let shutdown = state.listeners_shutdown.clone();
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { upgrade::handle(state, peer, req) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service).with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    // Rejections surface here; the socket is dropped with no response.
    if let Err(e) = result {
        tracing::debug!(%peer, err = %e, "http exchange ended");
    }
}

/// Serve the control router until the listener token is cancelled.
pub async fn serve_control(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let shutdown = state.listeners_shutdown.clone();
    let router = control::build_control_router(state);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    tracing::debug!("control listener stopped");
    Ok(())
}
