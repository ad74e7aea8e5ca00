// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by the upgrade path, the dispatch API, and the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidPath,
    SecurityViolation,
    BadHandshake,
    ClientNotConnected,
    SendQueueFull,
    MethodNotFound,
    InvalidParams,
    Unauthorized,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidPath => 404,
            Self::SecurityViolation => 403,
            Self::BadHandshake => 400,
            Self::ClientNotConnected => 404,
            Self::SendQueueFull => 503,
            Self::MethodNotFound => 404,
            Self::InvalidParams => 400,
            Self::Unauthorized => 401,
            Self::Internal => 500,
        }
    }

    /// JSON-RPC 2.0 error code. Application codes live in the server-error range.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::InvalidPath => -32001,
            Self::SecurityViolation => -32002,
            Self::BadHandshake => -32003,
            Self::ClientNotConnected => -32004,
            Self::SendQueueFull => -32005,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::Unauthorized => -32006,
            Self::Internal => -32603,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPath => "wss.invalidPath",
            Self::SecurityViolation => "wss.securityViolation",
            Self::BadHandshake => "wss.badHandshake",
            Self::ClientNotConnected => "wss.clientNotConnected",
            Self::SendQueueFull => "wss.sendQueueFull",
            Self::MethodNotFound => "wss.methodNotFound",
            Self::InvalidParams => "wss.invalidParams",
            Self::Unauthorized => "wss.unauthorized",
            Self::Internal => "wss.internal",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope for the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
