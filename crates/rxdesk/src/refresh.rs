// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token renewal against the refresh endpoint.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::COOKIE;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::token::AccessToken;

/// Source of fresh access tokens.
///
/// Object-safe for use as `Arc<dyn Refresher>`.
pub trait Refresher: Send + Sync + 'static {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, ClientError>> + Send + '_>>;
}

/// Body returned by the refresh endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken", alias = "access_token", default)]
    pub access_token: Option<String>,
}

/// Calls `POST {base_url}{refresh_path}` with no body.
///
/// The endpoint authenticates with an ambient cookie, never with the expired
/// bearer token.
pub struct HttpRefresher {
    client: reqwest::Client,
    url: String,
    cookie: Option<String>,
}

impl HttpRefresher {
    pub fn new(client: reqwest::Client, url: String, cookie: Option<String>) -> Self {
        Self { client, url, cookie }
    }

    /// Perform a single refresh request.
    pub async fn do_refresh(&self) -> Result<AccessToken, ClientError> {
        let mut req = self.client.post(&self.url);
        if let Some(ref cookie) = self.cookie {
            req = req.header(COOKIE, cookie);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::refresh(format!("refresh request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::refresh(format!("refresh endpoint returned {status}: {text}")));
        }

        let body: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::refresh(format!("malformed refresh response: {e}")))?;
        body.access_token
            .and_then(AccessToken::parse)
            .ok_or_else(|| ClientError::refresh("refresh response carried no access token"))
    }
}

impl Refresher for HttpRefresher {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, ClientError>> + Send + '_>> {
        Box::pin(self.do_refresh())
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
