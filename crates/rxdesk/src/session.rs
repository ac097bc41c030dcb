// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session invalidation after a permanent refresh failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::events::SessionEvent;
use crate::token::TokenStore;

/// Hook invoked once per failed refresh cycle.
///
/// Implementations must be idempotent: repeated calls have no effect beyond
/// the first.
pub trait SessionInvalidator: Send + Sync {
    fn invalidate(&self, reason: &str);

    /// Called when a new session starts: after login or a successful refresh.
    fn rearm(&self) {}
}

/// Drops local session state and points the user at the login surface.
pub struct LoginRedirect {
    login_url: String,
    tokens: Arc<TokenStore>,
    event_tx: broadcast::Sender<SessionEvent>,
    fired: AtomicBool,
}

impl LoginRedirect {
    pub fn new(
        login_url: impl Into<String>,
        tokens: Arc<TokenStore>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { login_url: login_url.into(), tokens, event_tx, fired: AtomicBool::new(false) }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl SessionInvalidator for LoginRedirect {
    fn invalidate(&self, reason: &str) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tokens.clear();
        tracing::warn!(login = %self.login_url, reason, "session expired, please sign in again");
        let _ = self.event_tx.send(SessionEvent::SessionExpired {
            login_url: self.login_url.clone(),
            reason: reason.to_owned(),
        });
    }

    fn rearm(&self) {
        self.fired.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
