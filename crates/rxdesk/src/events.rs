// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Session lifecycle notifications broadcast by the client.
///
/// Token values are never carried on this channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A refresh cycle settled with a new access token.
    TokenRefreshed { cycle: u64, waiters: usize },
    /// The session could not be renewed; the user must sign in again.
    SessionExpired { login_url: String, reason: String },
}
