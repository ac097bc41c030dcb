// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable machine-readable codes for client errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Network,
    Status,
    Unauthorized,
    RefreshFailed,
    RetryExhausted,
    Cancelled,
    Decode,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Status => "STATUS",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
            Self::Decode => "DECODE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the authenticated client.
///
/// `AuthorizationFailure` is only ever observed internally on a first attempt;
/// callers of [`crate::client::ApiClient`] see either the replayed result or a
/// [`ClientError::RefreshFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport failure unrelated to auth (connect, timeout, body read).
    Network(String),
    /// Non-success, non-401 response from the server.
    Status { status: u16, body: String },
    /// The server rejected the bearer token on a first attempt.
    AuthorizationFailure,
    /// The refresh endpoint failed, timed out, or returned an unusable token.
    RefreshFailure { reason: String },
    /// A replayed request was rejected again.
    RetryExhausted,
    /// The caller cancelled the call.
    Cancelled,
    /// The response body did not decode as the requested type.
    Decode(String),
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network(_) => ErrorCode::Network,
            Self::Status { .. } => ErrorCode::Status,
            Self::AuthorizationFailure => ErrorCode::Unauthorized,
            Self::RefreshFailure { .. } => ErrorCode::RefreshFailed,
            Self::RetryExhausted => ErrorCode::RetryExhausted,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Decode(_) => ErrorCode::Decode,
        }
    }

    pub fn refresh(reason: impl Into<String>) -> Self {
        Self::RefreshFailure { reason: reason.into() }
    }

    /// True for errors the dispatcher absorbs by refreshing.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(self, Self::AuthorizationFailure)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Status { status, body } if body.is_empty() => {
                write!(f, "server returned {status}")
            }
            Self::Status { status, body } => write!(f, "server returned {status}: {body}"),
            Self::AuthorizationFailure => f.write_str("access token rejected"),
            Self::RefreshFailure { reason } => {
                write!(f, "token refresh failed, please sign in again: {reason}")
            }
            Self::RetryExhausted => f.write_str("access token rejected after refresh"),
            Self::Cancelled => f.write_str("request cancelled"),
            Self::Decode(msg) => write!(f, "invalid response body: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Decode(e.to_string());
        }
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
