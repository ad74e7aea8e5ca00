// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ErrorCode;
use crate::state::GatewayState;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
///
/// `expected == None` disables auth.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ErrorCode> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ErrorCode::Unauthorized)?;

    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// First non-empty `access_token` value in a query string, form-decoded
/// (`+` is a space, then percent escapes).
pub fn access_token(query: Option<&str>) -> Option<Cow<'_, str>> {
    query?
        .split('&')
        .filter_map(|pair| pair.strip_prefix("access_token="))
        .filter(|value| !value.is_empty())
        .find_map(|value| {
            if value.contains('+') {
                let spaced = value.replace('+', " ");
                urlencoding::decode(&spaced).ok().map(|d| Cow::Owned(d.into_owned()))
            } else {
                urlencoding::decode(value).ok()
            }
        })
}

/// Control-plane middleware: Bearer auth on everything except `/api/v1/health`.
pub async fn auth_layer(
    State(state): State<Arc<GatewayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/api/v1/health" {
        return next.run(req).await;
    }

    let expected = state.config.control.as_ref().and_then(|c| c.token.as_deref());
    if let Err(code) = validate_bearer(req.headers(), expected) {
        return code.to_http_response("unauthorized").into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
