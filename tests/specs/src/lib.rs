// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `wsgate` binary as a subprocess and drives it over the
//! upgrade endpoint and the control plane.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

use wsgate::test_support::TokenMinter;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `wsgate` binary.
pub fn wsgate_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("wsgate")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `wsgate` process that is killed on drop.
pub struct WsgateProcess {
    child: Child,
    port: u16,
    control_port: u16,
    control_token: Option<String>,
    _config_dir: Option<tempfile::TempDir>,
}

/// Builder for the flags a [`WsgateProcess`] starts with.
///
/// Defaults to one room `test` in namespace `wss`, trusting
/// [`TokenMinter::new`], with the control plane enabled.
pub struct WsgateBuilder {
    rooms: Vec<String>,
    control_token: Option<String>,
    config_file: Option<serde_json::Value>,
    ping_interval_ms: Option<u64>,
}

impl Default for WsgateBuilder {
    fn default() -> Self {
        Self {
            rooms: vec!["test".to_owned()],
            control_token: None,
            config_file: None,
            ping_interval_ms: None,
        }
    }
}

impl WsgateBuilder {
    /// Replace the room list (`--room`).
    pub fn rooms(mut self, rooms: &[&str]) -> Self {
        self.rooms = rooms.iter().map(|r| (*r).to_owned()).collect();
        self
    }

    /// Require a bearer token on the control plane (`--control-token`).
    pub fn control_token(mut self, token: &str) -> Self {
        self.control_token = Some(token.to_owned());
        self
    }

    /// Write `config` to a temp file and pass it with `--config`. Ports are
    /// still given as flags.
    pub fn config_file(mut self, config: serde_json::Value) -> Self {
        self.config_file = Some(config);
        self
    }

    /// Ping interval (`--ping-interval-ms`).
    pub fn ping_interval_ms(mut self, ms: u64) -> Self {
        self.ping_interval_ms = Some(ms);
        self
    }

    pub fn spawn(self) -> anyhow::Result<WsgateProcess> {
        ensure_crypto();
        let binary = wsgate_binary();
        anyhow::ensure!(binary.exists(), "wsgate binary not found at {}", binary.display());

        let port = free_port()?;
        let control_port = free_port()?;
        let key = TokenMinter::new()?.jwk().x.unwrap_or_default();

        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--control-port".into(),
            control_port.to_string(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];

        let config_dir = match self.config_file {
            Some(ref config) => {
                let dir = tempfile::tempdir()?;
                let path = dir.path().join("wsgate.json");
                std::fs::write(&path, serde_json::to_vec_pretty(config)?)?;
                args.extend(["--config".into(), path.to_string_lossy().into_owned()]);
                Some(dir)
            }
            None => {
                args.extend(["--jwt-ed25519-key".into(), key]);
                for room in &self.rooms {
                    args.extend(["--room".into(), room.clone()]);
                }
                None
            }
        };

        if let Some(ms) = self.ping_interval_ms {
            args.extend(["--ping-interval-ms".into(), ms.to_string()]);
        }
        if let Some(ref token) = self.control_token {
            args.extend(["--control-token".into(), token.clone()]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .env_remove("WSGATE_CONFIG")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(WsgateProcess {
            child,
            port,
            control_port,
            control_token: self.control_token,
            _config_dir: config_dir,
        })
    }
}

impl WsgateProcess {
    pub fn build() -> WsgateBuilder {
        WsgateBuilder::default()
    }

    /// Spawn with the default single-room configuration.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Control-plane base URL.
    pub fn control_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.control_port)
    }

    /// Upgrade URL for `/<namespace>/<room>` with a credential attached.
    pub fn ws_url(&self, namespace: &str, room: &str, token: &str) -> String {
        format!("ws://127.0.0.1:{}/{namespace}/{room}?access_token={token}", self.port)
    }

    /// Poll the control plane's health endpoint until it answers.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.control_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("wsgate did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait until the gateway reports `n` live connections.
    pub async fn wait_connections(&self, n: u64, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let url = format!("{}/api/v1/health", self.control_url());
        loop {
            let health: serde_json::Value = reqwest::get(&url).await?.json().await?;
            if health["connections"].as_u64() == Some(n) {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("expected {n} connections, health reports {health}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Call a dispatch method over JSON-RPC and return the full response.
    pub async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let mut req = reqwest::Client::new().post(format!("{}/api/v1/rpc", self.control_url()));
        if let Some(ref token) = self.control_token {
            req = req.bearer_auth(token);
        }
        let body = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        Ok(req.json(&body).send().await?.json().await?)
    }

    /// Send SIGTERM.
    pub fn terminate(&self) -> anyhow::Result<()> {
        let status = Command::new("kill").args(["-TERM", &self.pid().to_string()]).status()?;
        anyhow::ensure!(status.success(), "kill -TERM failed: {status}");
        Ok(())
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("wsgate did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for WsgateProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Run the binary with `args` and return its exit code.
pub fn run_to_exit(args: &[&str]) -> anyhow::Result<Option<i32>> {
    let binary = wsgate_binary();
    anyhow::ensure!(binary.exists(), "wsgate binary not found at {}", binary.display());
    let status = Command::new(&binary)
        .args(args)
        .env_remove("WSGATE_CONFIG")
        .env_remove("WSGATE_PORT")
        .env_remove("WSGATE_ROOMS")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.code())
}
