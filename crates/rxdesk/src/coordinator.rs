// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access token refresh.
//!
//! Requests rejected with 401 join a [`RefreshCoordinator`] as waiters. The
//! first waiter to arrive while idle starts exactly one refresh call; later
//! arrivals queue behind it. When the refresh settles the queue is taken and
//! the state flips back to idle under one lock, and every waiter present at
//! that moment receives the same outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::refresh::Refresher;
use crate::session::SessionInvalidator;
use crate::token::{AccessToken, TokenStore};

/// Outcome delivered to every waiter of a cycle.
pub type Settlement = Result<AccessToken, ClientError>;

/// A caller held until the in-flight refresh settles.
///
/// Consumed by value at settlement, so each waiter is resolved at most once.
struct Waiter {
    tx: oneshot::Sender<Settlement>,
    cancel: CancellationToken,
}

enum RefreshState {
    Idle,
    Refreshing { cycle: u64, waiters: Vec<Waiter> },
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    tokens: Arc<TokenStore>,
    refresher: Arc<dyn Refresher>,
    invalidator: Arc<dyn SessionInvalidator>,
    event_tx: broadcast::Sender<SessionEvent>,
    refresh_timeout: Duration,
    cycles: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        tokens: Arc<TokenStore>,
        refresher: Arc<dyn Refresher>,
        invalidator: Arc<dyn SessionInvalidator>,
        event_tx: broadcast::Sender<SessionEvent>,
        refresh_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefreshState::Idle),
            tokens,
            refresher,
            invalidator,
            event_tx,
            refresh_timeout,
            cycles: AtomicU64::new(0),
        })
    }

    /// Join the current refresh cycle, starting one if idle, and wait for it.
    ///
    /// Cancelling `cancel` returns [`ClientError::Cancelled`] immediately; the
    /// refresh itself keeps running for the other waiters.
    pub async fn await_refresh(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let rx = self.enqueue(cancel.clone());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            settled = rx => match settled {
                Ok(outcome) => outcome,
                // Sender dropped without a send: only happens for cancelled waiters.
                Err(_) => Err(ClientError::Cancelled),
            },
        }
    }

    /// Number of waiters queued behind the in-flight refresh.
    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of refresh cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    fn enqueue(self: &Arc<Self>, cancel: CancellationToken) -> oneshot::Receiver<Settlement> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { tx, cancel };

        let mut state = self.state.lock();
        let idle_waiter = match &mut *state {
            RefreshState::Refreshing { cycle, waiters } => {
                waiters.push(waiter);
                debug!(cycle = *cycle, waiters = waiters.len(), "queued behind in-flight refresh");
                None
            }
            RefreshState::Idle => Some(waiter),
        };

        if let Some(waiter) = idle_waiter {
            let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
            *state = RefreshState::Refreshing { cycle, waiters: vec![waiter] };
            drop(state);
            debug!(cycle, "starting token refresh");
            self.spawn_refresh(cycle);
        }
        rx
    }

    /// Run the refresh on its own task so no caller's cancellation can abort it.
    fn spawn_refresh(self: &Arc<Self>, cycle: u64) {
        let refresher = Arc::clone(&self.refresher);
        let timeout = self.refresh_timeout;
        let call = tokio::spawn(async move {
            match tokio::time::timeout(timeout, refresher.refresh()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::refresh(format!(
                    "refresh timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        });

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match call.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ClientError::refresh(format!("refresh task failed: {e}"))),
            };
            coordinator.settle(cycle, outcome);
        });
    }

    fn settle(&self, cycle: u64, outcome: Settlement) {
        // Token first, so requests issued from here on carry the new value.
        match &outcome {
            Ok(token) => self.tokens.set(token.clone()),
            Err(_) => self.tokens.clear(),
        }

        let waiters = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters, .. } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        let queued = waiters.len();
        let live: Vec<Waiter> = waiters
            .into_iter()
            .filter(|w| !w.cancel.is_cancelled() && !w.tx.is_closed())
            .collect();
        if live.len() < queued {
            debug!(cycle, cancelled = queued - live.len(), "dropped cancelled waiters");
        }

        match &outcome {
            Ok(_) => {
                info!(cycle, waiters = live.len(), "access token refreshed");
                // A recovered session may expire again.
                self.invalidator.rearm();
                let _ = self
                    .event_tx
                    .send(SessionEvent::TokenRefreshed { cycle, waiters: live.len() });
            }
            Err(e) => {
                warn!(cycle, waiters = live.len(), err = %e, "token refresh failed");
                self.invalidator.invalidate(&e.to_string());
            }
        }

        for waiter in live {
            let _ = waiter.tx.send(outcome.clone());
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
