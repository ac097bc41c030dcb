// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the authenticated API client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the pricing API.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "RXDESK_BASE_URL")]
    pub base_url: String,

    /// Path of the token refresh endpoint.
    #[arg(long, default_value = "/api/auth/refresh", env = "RXDESK_REFRESH_PATH")]
    pub refresh_path: String,

    /// Where users are sent to sign in again after the session expires.
    #[arg(long, default_value = "/login", env = "RXDESK_LOGIN_URL")]
    pub login_url: String,

    /// Timeout for API calls in milliseconds.
    #[arg(long, default_value_t = 30000, env = "RXDESK_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Timeout for the refresh call in milliseconds.
    #[arg(long, default_value_t = 30000, env = "RXDESK_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Cookie header sent to the refresh endpoint (e.g. `refresh_session=...`).
    #[arg(long, env = "RXDESK_REFRESH_COOKIE")]
    pub refresh_cookie: Option<String>,

    /// Directory for persisted session state.
    #[arg(long, env = "RXDESK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Keep the access token in memory only.
    #[arg(long, env = "RXDESK_NO_PERSIST")]
    pub no_persist: bool,
}

impl ClientConfig {
    /// Config for `base_url` with every other field at its CLI default.
    ///
    /// Persistence is on, as with the CLI; set `no_persist` (or `state_dir`)
    /// before building a client that must not touch the user's state dir.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: "/api/auth/refresh".to_owned(),
            login_url: "/login".to_owned(),
            timeout_ms: 30000,
            refresh_timeout_ms: 30000,
            refresh_cookie: None,
            state_dir: None,
            no_persist: false,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("--base-url must not be empty");
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("--base-url must be an http(s) URL: {}", self.base_url);
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be greater than zero");
        }
        if self.refresh_timeout_ms == 0 {
            anyhow::bail!("--refresh-timeout-ms must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn refresh_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.refresh_path.starts_with("http://") || self.refresh_path.starts_with("https://") {
            return self.refresh_path.clone();
        }
        if self.refresh_path.starts_with('/') {
            format!("{base}{}", self.refresh_path)
        } else {
            format!("{base}/{}", self.refresh_path)
        }
    }

    /// Resolve the state directory.
    ///
    /// Checks `--state-dir` / `RXDESK_STATE_DIR`, then `$XDG_STATE_HOME/rxdesk`,
    /// then `$HOME/.local/state/rxdesk`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("rxdesk");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/rxdesk");
        }
        PathBuf::from(".rxdesk")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
