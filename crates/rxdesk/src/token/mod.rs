// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token storage.
//!
//! [`TokenStore`] is the single source of truth read by every outgoing
//! request. Writes go through to an optional [`TokenPersistence`] backing so
//! the session survives restarts.

pub mod persist;

use std::fmt;

use parking_lot::RwLock;

pub use persist::{FileTokenPersistence, TokenPersistence};

/// Opaque bearer credential. Never parsed, only held and replaced.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw value. Blank values are not usable tokens.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return None;
        }
        Some(Self(raw))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Current access token behind a read/write lock.
///
/// Readers always observe a complete token: either the previous value or the
/// replacement, never a partial update.
pub struct TokenStore {
    current: RwLock<Option<AccessToken>>,
    backing: Option<Box<dyn TokenPersistence>>,
}

impl TokenStore {
    /// In-memory store with no durable backing.
    pub fn in_memory() -> Self {
        Self { current: RwLock::new(None), backing: None }
    }

    /// Store seeded from (and writing through to) `backing`.
    pub fn with_persistence(backing: Box<dyn TokenPersistence>) -> Self {
        let initial = match backing.load() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(err = %e, "failed to load persisted token");
                None
            }
        };
        if initial.is_some() {
            tracing::debug!("restored persisted access token");
        }
        Self { current: RwLock::new(initial), backing: Some(backing) }
    }

    pub fn get(&self) -> Option<AccessToken> {
        self.current.read().clone()
    }

    pub fn set(&self, token: AccessToken) {
        if let Some(ref backing) = self.backing {
            if let Err(e) = backing.save(&token) {
                tracing::warn!(err = %e, "failed to persist access token");
            }
        }
        *self.current.write() = Some(token);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
        if let Some(ref backing) = self.backing {
            if let Err(e) = backing.remove() {
                tracing::warn!(err = %e, "failed to remove persisted access token");
            }
        }
    }

    pub fn is_present(&self) -> bool {
        self.current.read().is_some()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
