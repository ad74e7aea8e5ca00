// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer credential verification for WebSocket upgrades.
//!
//! Credentials are JWS compact tokens, verified with `jsonwebtoken` against
//! the keys configured in [`AuthConfig`]. Only the `sub` and `ses` claims
//! survive into the connection's [`Identity`].

use std::collections::HashSet;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

/// Authenticated identity attached to a connection for its whole life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Reason a credential was refused. Logged server-side only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    Missing,
    Malformed(&'static str),
    UnsupportedAlgorithm(String),
    NoMatchingKey,
    BadSignature,
    Expired,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
    MissingSubject,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("credential missing"),
            Self::Malformed(what) => write!(f, "malformed token: {what}"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm: {alg}"),
            Self::NoMatchingKey => f.write_str("no verification key for token"),
            Self::BadSignature => f.write_str("signature verification failed"),
            Self::Expired => f.write_str("token expired"),
            Self::NotYetValid => f.write_str("token not yet valid"),
            Self::IssuerMismatch => f.write_str("issuer mismatch"),
            Self::AudienceMismatch => f.write_str("audience mismatch"),
            Self::MissingSubject => f.write_str("token has no subject"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Turns an opaque bearer credential into an [`Identity`].
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// JSON Web Key as it appears in configuration.
///
/// Only `OKP`/`Ed25519` public keys and `oct` secrets are usable; other
/// members (`d`, `use`, ...) are accepted and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl Jwk {
    /// Ed25519 public key from its base64url encoding.
    pub fn ed25519(x: &str) -> Self {
        Self {
            kty: "OKP".to_owned(),
            kid: None,
            crv: Some("Ed25519".to_owned()),
            x: Some(x.to_owned()),
            k: None,
        }
    }

    /// HMAC secret for HS256.
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            kty: "oct".to_owned(),
            kid: None,
            crv: None,
            x: None,
            k: Some(URL_SAFE_NO_PAD.encode(secret)),
        }
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }
}

struct VerificationKey {
    kid: Option<String>,
    algorithm: Algorithm,
    key: DecodingKey,
}

impl VerificationKey {
    fn from_jwk(jwk: &Jwk) -> anyhow::Result<Self> {
        let (algorithm, key) = match (jwk.kty.as_str(), jwk.crv.as_deref()) {
            ("OKP", Some("Ed25519")) => {
                let x = jwk.x.as_deref().ok_or_else(|| anyhow::anyhow!("Ed25519 JWK missing x"))?;
                let x = x.trim_end_matches('=');
                let public =
                    URL_SAFE_NO_PAD.decode(x).map_err(|e| anyhow::anyhow!("Ed25519 JWK x: {e}"))?;
                if public.len() != 32 {
                    anyhow::bail!("Ed25519 public key must be 32 bytes, got {}", public.len());
                }
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|e| anyhow::anyhow!("Ed25519 JWK x: {e}"))?;
                (Algorithm::EdDSA, key)
            }
            ("oct", _) => {
                let k = jwk.k.as_deref().ok_or_else(|| anyhow::anyhow!("oct JWK missing k"))?;
                let secret = URL_SAFE_NO_PAD
                    .decode(k.trim_end_matches('='))
                    .map_err(|e| anyhow::anyhow!("oct JWK k: {e}"))?;
                if secret.is_empty() {
                    anyhow::bail!("oct JWK secret is empty");
                }
                (Algorithm::HS256, DecodingKey::from_secret(&secret))
            }
            (kty, crv) => anyhow::bail!("unsupported JWK: kty={kty} crv={crv:?}"),
        };
        Ok(Self { kid: jwk.kid.clone(), algorithm, key })
    }

    fn accepts(&self, alg: Algorithm, kid: Option<&str>) -> bool {
        let kid_ok = match (kid, self.kid.as_deref()) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        };
        self.algorithm == alg && kid_ok
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    ses: Option<String>,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => Self::IssuerMismatch,
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => Self::AudienceMismatch,
            ErrorKind::InvalidAlgorithm => Self::UnsupportedAlgorithm(e.to_string()),
            _ => Self::Malformed("payload"),
        }
    }
}

/// JWS verifier for `EdDSA` and `HS256` tokens, built on `jsonwebtoken`.
pub struct JwtVerifier {
    keys: Vec<VerificationKey>,
    issuer: Option<String>,
    audience: Option<String>,
    leeway_secs: u64,
    skip_signature: bool,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> anyhow::Result<Self> {
        let keys =
            config.keys.iter().map(VerificationKey::from_jwk).collect::<anyhow::Result<Vec<_>>>()?;
        if keys.is_empty() && !config.insecure_skip_verify {
            anyhow::bail!("no verification keys configured");
        }
        if config.insecure_skip_verify {
            tracing::warn!("token signature verification is disabled");
        }
        Ok(Self {
            keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway_secs: config.leeway_secs,
            skip_signature: config.insecure_skip_verify,
        })
    }

    /// Claim checks for `alg`. `exp` and `nbf` are enforced only when present.
    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway_secs;
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = self.audience.is_some();
        if let Some(ref aud) = self.audience {
            validation.set_audience(&[aud]);
        }
        if let Some(ref iss) = self.issuer {
            validation.set_issuer(&[iss]);
        }
        if self.skip_signature {
            validation.insecure_disable_signature_validation();
        }
        validation
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Malformed("header"))?;

        if self.skip_signature {
            let key = DecodingKey::from_secret(&[]);
            return Ok(decode::<Claims>(token, &key, &self.validation(header.alg))?.claims);
        }

        if !matches!(header.alg, Algorithm::EdDSA | Algorithm::HS256) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let mut matched = false;
        for key in self.keys.iter().filter(|k| k.accepts(header.alg, header.kid.as_deref())) {
            matched = true;
            match decode::<Claims>(token, &key.key, &self.validation(key.algorithm)) {
                Ok(data) => return Ok(data.claims),
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(if matched { AuthError::BadSignature } else { AuthError::NoMatchingKey })
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("keys", &self.keys.len())
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("skip_signature", &self.skip_signature)
            .finish()
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        if token.split('.').count() != 3 {
            return Err(AuthError::Malformed("expected three segments"));
        }

        let claims = self.decode_claims(token)?;
        let actor_id = claims.sub.filter(|s| !s.is_empty()).ok_or(AuthError::MissingSubject)?;
        Ok(Identity { actor_id, session_id: claims.ses })
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
