// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Build the shared HTTP client used for API calls and token refresh.
///
/// The cookie store is shared so the refresh endpoint sees the same ambient
/// session cookie the API set at login.
pub fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    // Ignore the error: another component may already have installed it.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let client = reqwest::Client::builder().timeout(timeout).cookie_store(true).build()?;
    Ok(client)
}
