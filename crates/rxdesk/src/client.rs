// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wrapped call interface used by business code.
//!
//! An [`ApiClient`] owns one token store, one refresh coordinator and one
//! dispatcher. Every path that needs a fresh token, whether a rejected request
//! or an explicit [`ApiClient::refresh`], goes through that single
//! coordinator, so the two can never refresh concurrently.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::coordinator::RefreshCoordinator;
use crate::dispatch::{ApiRequest, ApiResponse, RequestDispatcher};
use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::refresh::{HttpRefresher, Refresher};
use crate::session::{LoginRedirect, SessionInvalidator};
use crate::token::{AccessToken, FileTokenPersistence, TokenStore};

/// Capacity of the session event channel built by [`ApiClient::new`].
pub const EVENT_CAPACITY: usize = 64;

/// Snapshot of client session state.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub base_url: String,
    pub has_token: bool,
    pub refreshing: bool,
    pub pending_waiters: usize,
    pub refresh_cycles: u64,
}

pub struct ApiClient {
    base_url: String,
    tokens: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    dispatcher: RequestDispatcher,
    invalidator: Arc<dyn SessionInvalidator>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    /// Build a client from config with the HTTP refresher and login redirect.
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let tokens = Arc::new(if config.no_persist {
            TokenStore::in_memory()
        } else {
            TokenStore::with_persistence(Box::new(FileTokenPersistence::in_dir(
                &config.state_dir(),
            )))
        });
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let invalidator = Arc::new(LoginRedirect::new(
            config.login_url.clone(),
            Arc::clone(&tokens),
            event_tx.clone(),
        ));
        Self::assemble(config, tokens, invalidator, None, event_tx)
    }

    /// Build a client around caller-supplied session collaborators.
    ///
    /// `refresher` defaults to the HTTP refresh endpoint from `config`.
    /// `event_tx` backs [`ApiClient::subscribe`]; hand the same sender to an
    /// invalidator that announces expiry.
    pub fn with_parts(
        config: &ClientConfig,
        tokens: Arc<TokenStore>,
        invalidator: Arc<dyn SessionInvalidator>,
        refresher: Option<Arc<dyn Refresher>>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Self::assemble(config, tokens, invalidator, refresher, event_tx)
    }

    fn assemble(
        config: &ClientConfig,
        tokens: Arc<TokenStore>,
        invalidator: Arc<dyn SessionInvalidator>,
        refresher: Option<Arc<dyn Refresher>>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        let http = crate::http::build_client(config.timeout())?;
        let refresher: Arc<dyn Refresher> = match refresher {
            Some(r) => r,
            None => Arc::new(HttpRefresher::new(
                http.clone(),
                config.refresh_url(),
                config.refresh_cookie.clone(),
            )),
        };
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&tokens),
            refresher,
            Arc::clone(&invalidator),
            event_tx.clone(),
            config.refresh_timeout(),
        );
        let dispatcher = RequestDispatcher::new(
            http,
            config.base_url.clone(),
            Arc::clone(&tokens),
            Arc::clone(&coordinator),
        );
        Ok(Self {
            base_url: config.base_url.clone(),
            tokens,
            coordinator,
            dispatcher,
            invalidator,
            event_tx,
        })
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.dispatcher.dispatch(request, &CancellationToken::new()).await
    }

    pub async fn send_with_cancel(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ClientError> {
        self.dispatcher.dispatch(request, cancel).await
    }

    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<ApiResponse, ClientError> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |req, (k, v)| req.with_query(*k, *v));
        self.send(request).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::put(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Renew the token now, joining any refresh already in flight.
    pub async fn refresh(&self) -> Result<AccessToken, ClientError> {
        self.coordinator.await_refresh(&CancellationToken::new()).await
    }

    /// Start a session with a token obtained from the login flow.
    pub fn login(&self, raw_token: &str) -> anyhow::Result<()> {
        let token = AccessToken::parse(raw_token)
            .ok_or_else(|| anyhow::anyhow!("access token must not be blank"))?;
        self.tokens.set(token);
        self.invalidator.rearm();
        tracing::info!(base = %self.base_url, "signed in");
        Ok(())
    }

    pub fn logout(&self) {
        self.tokens.clear();
        tracing::info!(base = %self.base_url, "signed out");
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            base_url: self.base_url.clone(),
            has_token: self.tokens.is_present(),
            refreshing: self.coordinator.is_refreshing(),
            pending_waiters: self.coordinator.pending(),
            refresh_cycles: self.coordinator.cycles(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }
}
