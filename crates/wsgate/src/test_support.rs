// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and integration tests.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::json;

use std::sync::Arc;

use crate::auth::{JwtVerifier, Jwk};
use crate::config::GatewayConfig;
use crate::dispatch::SequentialIds;
use crate::state::{epoch_ms, GatewayState};

/// Assert that an expression is `Err` and its message contains `$substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// PKCS#8 v2 framing around an Ed25519 seed and its public key.
const PKCS8_SEED_PREFIX: [u8; 16] =
    [0x30, 0x53, 0x02, 0x01, 0x01, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20];
const PKCS8_PUBLIC_PREFIX: [u8; 5] = [0xa1, 0x23, 0x03, 0x21, 0x00];

/// Signs EdDSA tokens with a fixed-seed Ed25519 key.
pub struct TokenMinter {
    key: EncodingKey,
    public_x: String,
    kid: Option<String>,
}

impl TokenMinter {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_seed([7u8; 32])
    }

    pub fn from_seed(seed: [u8; 32]) -> anyhow::Result<Self> {
        let pair = Ed25519KeyPair::from_seed_unchecked(&seed).anyhow()?;
        let public = pair.public_key().as_ref();

        let mut der = Vec::with_capacity(85);
        der.extend_from_slice(&PKCS8_SEED_PREFIX);
        der.extend_from_slice(&seed);
        der.extend_from_slice(&PKCS8_PUBLIC_PREFIX);
        der.extend_from_slice(public);

        Ok(Self {
            key: EncodingKey::from_ed_der(&der),
            public_x: URL_SAFE_NO_PAD.encode(public),
            kid: None,
        })
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Public half as a configuration JWK.
    pub fn jwk(&self) -> Jwk {
        let jwk = Jwk::ed25519(&self.public_x);
        match self.kid {
            Some(ref kid) => jwk.with_kid(kid.clone()),
            None => jwk,
        }
    }

    /// Sign arbitrary claims. Empty on a signing failure, which no verifier accepts.
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = self.kid.clone();
        jsonwebtoken::encode(&header, claims, &self.key).unwrap_or_default()
    }

    /// A token for `sub` that is valid for fifteen minutes.
    pub fn token_for(&self, sub: &str) -> String {
        let now = epoch_secs();
        self.sign(&json!({
            "typ": "Bearer",
            "sub": sub,
            "ses": uuid::Uuid::new_v4().to_string(),
            "iat": now,
            "exp": now + 900,
        }))
    }
}

/// Current time in seconds since the epoch.
pub fn epoch_secs() -> u64 {
    epoch_ms() / 1000
}

/// Sign claims with HS256.
pub fn hs256_token(secret: &[u8], claims: &serde_json::Value) -> String {
    let key = EncodingKey::from_secret(secret);
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &key).unwrap_or_default()
}

/// An `alg: none` token with an empty signature segment.
pub fn unsigned_token(claims: &serde_json::Value) -> String {
    let header = json!({ "alg": "none" });
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Loopback config on an ephemeral port, trusting `minter`, with slow pings.
pub fn test_config(rooms: &[&str], minter: &TokenMinter) -> GatewayConfig {
    let mut config = GatewayConfig::new(0, rooms.iter().map(|r| (*r).to_owned()).collect());
    config.server.host = "127.0.0.1".to_owned();
    config.ping_interval = 60_000;
    config.auth.keys = vec![minter.jwk()];
    config
}

/// Gateway state for `config` with a real verifier and sequential message ids.
pub fn test_state(config: GatewayConfig) -> anyhow::Result<Arc<GatewayState>> {
    let verifier = Arc::new(JwtVerifier::new(&config.auth)?);
    let state = GatewayState::build(config, verifier, Arc::new(SequentialIds::default()))?;
    Ok(Arc::new(state))
}
