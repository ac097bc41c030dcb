// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request dispatch with transparent refresh-and-replay.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::coordinator::RefreshCoordinator;
use crate::error::ClientError;
use crate::token::{AccessToken, TokenStore};

/// Immutable description of one logical API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// One try at sending an [`ApiRequest`].
///
/// A replay is a new `Attempt` over the same shared request, so the request
/// itself is never mutated and `retried` can only go from false to true.
#[derive(Debug, Clone)]
pub struct Attempt {
    request: Arc<ApiRequest>,
    retried: bool,
    token: Option<AccessToken>,
}

impl Attempt {
    pub fn first(request: ApiRequest) -> Self {
        Self { request: Arc::new(request), retried: false, token: None }
    }

    /// The replay carries the token the refresh produced.
    pub fn replay(&self, token: AccessToken) -> Self {
        Self { request: Arc::clone(&self.request), retried: true, token: Some(token) }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn retried(&self) -> bool {
        self.retried
    }
}

/// Successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as JSON, or `null` when the server sent nothing.
    pub fn value(&self) -> Result<serde_json::Value, ClientError> {
        if self.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        self.json()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends requests with the current bearer token and hands 401s to the
/// [`RefreshCoordinator`].
pub struct RequestDispatcher {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestDispatcher {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, base_url, tokens, coordinator }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send `request`, refreshing and replaying once if the token is rejected.
    pub async fn dispatch(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        let first = Attempt::first(request);
        match self.run(&first, cancel).await {
            Err(e) if e.is_authorization_failure() => {}
            other => return other,
        }

        debug!(path = %first.request.path, "access token rejected, waiting for refresh");
        let token = self.coordinator.await_refresh(cancel).await?;
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let replay = first.replay(token);
        match self.run(&replay, cancel).await {
            Err(e) if e.is_authorization_failure() => {
                debug!(path = %replay.request.path, "replay rejected, giving up");
                Err(ClientError::RetryExhausted)
            }
            other => other,
        }
    }

    async fn run(
        &self,
        attempt: &Attempt,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = self.execute(attempt) => result,
        }
    }

    /// Send a single attempt and classify the outcome. No refresh logic.
    pub async fn execute(&self, attempt: &Attempt) -> Result<ApiResponse, ClientError> {
        let req = attempt.request();
        let mut builder = self.http.request(req.method.clone(), self.url(&req.path));
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }
        // Replays use the refreshed token; first attempts read the store.
        if let Some(token) = attempt.token.clone().or_else(|| self.tokens.get()) {
            builder = builder.bearer_auth(token.expose());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::AuthorizationFailure);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(path = %req.path, status = status.as_u16(), "request failed");
            return Err(ClientError::Status { status: status.as_u16(), body });
        }

        let body = resp.bytes().await?;
        Ok(ApiResponse { status: status.as_u16(), body })
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
