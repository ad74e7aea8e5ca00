// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::auth::Jwk;

pub const DEFAULT_NAMESPACE: &str = "wss";
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// Gateway configuration, as read from a JSON file or assembled from CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub rooms: Vec<String>,
    #[serde(default = "default_namespaces", deserialize_with = "one_or_many")]
    pub namespace: Vec<String>,
    /// Liveness ping interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Optional leading path segment (`/<prefix>/<namespace>/<room>`).
    #[serde(default)]
    pub prefix: Option<String>,
    /// Rooms of one namespace share a single connection set when true.
    #[serde(default)]
    pub share_rooms: bool,
    /// Per-connection outbound queue depth.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub control: Option<ControlConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

/// Trust source for upgrade credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub keys: Vec<Jwk>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
    /// Decode claims without checking signatures. Never enable outside tests.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            keys: vec![],
            issuer: None,
            audience: None,
            leeway_secs: DEFAULT_LEEWAY_SECS,
            insecure_skip_verify: false,
        }
    }
}

/// Loopback listener that serves the dispatch API as JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ControlConfig {
    #[serde(default = "default_control_host")]
    pub host: String,
    pub port: u16,
    /// Bearer token for control requests. If unset, auth is disabled.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}
fn default_control_host() -> String {
    "127.0.0.1".to_owned()
}
fn default_namespaces() -> Vec<String> {
    vec![DEFAULT_NAMESPACE.to_owned()]
}
fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}
fn default_outbound_capacity() -> usize {
    DEFAULT_OUTBOUND_CAPACITY
}
fn default_leeway() -> u64 {
    DEFAULT_LEEWAY_SECS
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl GatewayConfig {
    /// Minimal config: one port, the given rooms, default namespace.
    pub fn new(port: u16, rooms: Vec<String>) -> Self {
        Self {
            server: ServerConfig { host: default_host(), port },
            rooms,
            namespace: default_namespaces(),
            ping_interval: DEFAULT_PING_INTERVAL_MS,
            prefix: None,
            share_rooms: false,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            auth: AuthConfig::default(),
            control: None,
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("at least one namespace must be configured");
        }
        if self.rooms.is_empty() {
            anyhow::bail!("at least one room must be configured");
        }
        for name in self.namespace.iter().chain(self.rooms.iter()) {
            if name.is_empty() || name.contains(['/', '.']) {
                anyhow::bail!("invalid namespace or room name: {name:?}");
            }
        }
        if self.ping_interval == 0 {
            anyhow::bail!("pingInterval must be greater than zero");
        }
        if self.outbound_capacity == 0 {
            anyhow::bail!("outboundCapacity must be greater than zero");
        }
        if self.auth.keys.is_empty() && !self.auth.insecure_skip_verify {
            anyhow::bail!("auth.keys must contain at least one verification key");
        }
        if let Some(ref control) = self.control {
            if control.port != 0 && control.port == self.server.port && control.host == self.server.host
            {
                anyhow::bail!("control listener cannot share the upgrade listener address");
            }
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Routable upgrade path for a namespace/room pair.
    pub fn room_path(&self, namespace: &str, room: &str) -> String {
        match self.prefix.as_deref().map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("/{prefix}/{namespace}/{room}"),
            None => format!("/{namespace}/{room}"),
        }
    }
}

/// Authenticated WebSocket room gateway.
#[derive(Debug, Parser)]
#[command(name = "wsgate", version, about)]
pub struct Cli {
    /// Path to a JSON configuration file. Flags below override its values.
    #[arg(long, env = "WSGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host address to bind the upgrade listener to.
    #[arg(long, env = "WSGATE_HOST")]
    pub host: Option<String>,

    /// Port for the upgrade listener.
    #[arg(long, env = "WSGATE_PORT")]
    pub port: Option<u16>,

    /// Room names (repeatable or comma-separated).
    #[arg(long = "room", env = "WSGATE_ROOMS", value_delimiter = ',')]
    pub rooms: Vec<String>,

    /// Namespace names (repeatable or comma-separated). Defaults to `wss`.
    #[arg(long = "namespace", env = "WSGATE_NAMESPACES", value_delimiter = ',')]
    pub namespaces: Vec<String>,

    /// Liveness ping interval in milliseconds.
    #[arg(long, env = "WSGATE_PING_INTERVAL_MS")]
    pub ping_interval_ms: Option<u64>,

    /// Leading path segment for every room path.
    #[arg(long, env = "WSGATE_PREFIX")]
    pub prefix: Option<String>,

    /// Share one connection set across all rooms of a namespace.
    #[arg(long, env = "WSGATE_SHARE_ROOMS")]
    pub share_rooms: bool,

    /// Ed25519 public key (base64url, JWK `x`) for EdDSA tokens.
    #[arg(long, env = "WSGATE_JWT_ED25519_KEY")]
    pub jwt_ed25519_key: Option<String>,

    /// Shared secret for HS256 tokens.
    #[arg(long, env = "WSGATE_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Required `iss` claim.
    #[arg(long, env = "WSGATE_JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Required `aud` claim.
    #[arg(long, env = "WSGATE_JWT_AUDIENCE")]
    pub jwt_audience: Option<String>,

    /// Accept tokens without verifying signatures.
    #[arg(long, env = "WSGATE_INSECURE_SKIP_VERIFY")]
    pub insecure_skip_verify: bool,

    /// Control-plane port. The control listener is disabled when unset.
    #[arg(long, env = "WSGATE_CONTROL_PORT")]
    pub control_port: Option<u16>,

    /// Control-plane bind address.
    #[arg(long, env = "WSGATE_CONTROL_HOST", default_value = "127.0.0.1")]
    pub control_host: String,

    /// Bearer token for control-plane requests.
    #[arg(long, env = "WSGATE_CONTROL_TOKEN")]
    pub control_token: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "WSGATE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WSGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Merge the optional config file with flag overrides.
    pub fn to_config(&self) -> anyhow::Result<GatewayConfig> {
        let mut config = match self.config {
            Some(ref path) => GatewayConfig::from_file(path)?,
            None => {
                let port = self
                    .port
                    .ok_or_else(|| anyhow::anyhow!("server.port is required (--port or --config)"))?;
                GatewayConfig::new(port, vec![])
            }
        };

        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if !self.rooms.is_empty() {
            config.rooms = self.rooms.clone();
        }
        if !self.namespaces.is_empty() {
            config.namespace = self.namespaces.clone();
        }
        if let Some(ms) = self.ping_interval_ms {
            config.ping_interval = ms;
        }
        if self.prefix.is_some() {
            config.prefix = self.prefix.clone();
        }
        if self.share_rooms {
            config.share_rooms = true;
        }

        if let Some(ref x) = self.jwt_ed25519_key {
            config.auth.keys.push(Jwk::ed25519(x));
        }
        if let Some(ref secret) = self.jwt_secret {
            config.auth.keys.push(Jwk::hs256(secret.as_bytes()));
        }
        if self.jwt_issuer.is_some() {
            config.auth.issuer = self.jwt_issuer.clone();
        }
        if self.jwt_audience.is_some() {
            config.auth.audience = self.jwt_audience.clone();
        }
        if self.insecure_skip_verify {
            config.auth.insecure_skip_verify = true;
        }

        if let Some(port) = self.control_port {
            let token = self
                .control_token
                .clone()
                .or_else(|| config.control.as_ref().and_then(|c| c.token.clone()));
            config.control = Some(ControlConfig { host: self.control_host.clone(), port, token });
        } else if let Some(ref token) = self.control_token {
            if let Some(control) = config.control.as_mut() {
                control.token = Some(token.clone());
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
