// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end refresh-and-replay tests against a mock pricing API.
//!
//! The mock runs on a real TCP port; its refresh endpoint is gated by a
//! semaphore so tests decide exactly when a refresh settles.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

use rxdesk::events::SessionEvent;
use rxdesk::client::EVENT_CAPACITY;
use rxdesk::session::{LoginRedirect, SessionInvalidator};
use rxdesk::token::TokenStore;
use rxdesk::{ApiClient, ApiRequest, ClientConfig, ClientError};

// -- Mock API -----------------------------------------------------------------

struct MockApi {
    /// Token the API currently accepts.
    accepted: Mutex<Option<String>>,
    /// Tokens handed out by successive refresh calls.
    issued: Mutex<VecDeque<String>>,
    refresh_status: AtomicU16,
    refresh_calls: AtomicU32,
    refresh_gate: Semaphore,
    /// Reject every bearer token, even fresh ones.
    reject_all: AtomicBool,
    /// Authorization header of every `/api/drugs/search` call.
    seen: Mutex<Vec<Option<String>>>,
}

impl MockApi {
    fn new(accepted: Option<&str>, issued: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new(accepted.map(str::to_owned)),
            issued: Mutex::new(issued.iter().map(|s| (*s).to_owned()).collect()),
            refresh_status: AtomicU16::new(200),
            refresh_calls: AtomicU32::new(0),
            refresh_gate: Semaphore::new(0),
            reject_all: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn release_refreshes(&self, n: usize) {
        self.refresh_gate.add_permits(n);
    }

    fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::Acquire)
    }

    fn seen_with(&self, bearer: &str) -> usize {
        let expected = format!("Bearer {bearer}");
        self.seen.lock().iter().filter(|h| h.as_deref() == Some(expected.as_str())).count()
    }

    fn revoke(&self) {
        *self.accepted.lock() = None;
    }
}

async fn search(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_owned);
    api.seen.lock().push(auth.clone());

    let accepted = api.accepted.lock().clone();
    let ok = !api.reject_all.load(Ordering::Acquire)
        && matches!((&auth, &accepted), (Some(a), Some(t)) if *a == format!("Bearer {t}"));
    if !ok {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "token expired" })))
            .into_response();
    }
    Json(json!({
        "name": params.get("name").cloned().unwrap_or_default(),
        "auth": auth,
        "results": [{ "ndc": "00093-7180-01", "price": 4.12 }],
    }))
    .into_response()
}

async fn refresh(State(api): State<Arc<MockApi>>) -> Response {
    api.refresh_calls.fetch_add(1, Ordering::AcqRel);
    if let Ok(permit) = api.refresh_gate.acquire().await {
        permit.forget();
    }
    let status = api.refresh_status.load(Ordering::Acquire);
    if status != 200 {
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (code, Json(json!({ "error": "refresh rejected" }))).into_response();
    }
    let next = api.issued.lock().pop_front();
    match next {
        Some(token) => {
            *api.accepted.lock() = Some(token.clone());
            Json(json!({ "accessToken": token })).into_response()
        }
        None => Json(json!({})).into_response(),
    }
}

async fn broken_report() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "report generator unavailable").into_response()
}

async fn spawn_api(api: Arc<MockApi>) -> anyhow::Result<SocketAddr> {
    let app = Router::new()
        .route("/api/drugs/search", get(search))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/reports/broken", get(broken_report))
        .with_state(api);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}

// -- Client helpers -----------------------------------------------------------

#[derive(Default)]
struct CountingInvalidator {
    calls: AtomicU32,
}

impl SessionInvalidator for CountingInvalidator {
    fn invalidate(&self, _reason: &str) {
        self.calls.fetch_add(1, Ordering::AcqRel);
    }
}

impl CountingInvalidator {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }
}

fn test_client(addr: SocketAddr) -> anyhow::Result<(ApiClient, Arc<CountingInvalidator>)> {
    let mut config = ClientConfig::new(format!("http://{addr}"));
    config.timeout_ms = 5000;
    config.refresh_timeout_ms = 5000;
    let invalidator = Arc::new(CountingInvalidator::default());
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let client = ApiClient::with_parts(
        &config,
        Arc::new(TokenStore::in_memory()),
        Arc::clone(&invalidator) as Arc<dyn SessionInvalidator>,
        None,
        event_tx,
    )?;
    Ok((client, invalidator))
}

fn search_request(name: &str) -> ApiRequest {
    ApiRequest::get("/api/drugs/search").with_query("name", name)
}

async fn wait_for_waiters(client: &ApiClient, n: usize) -> anyhow::Result<()> {
    for _ in 0..1000 {
        if client.status().pending_waiters == n {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    anyhow::bail!("expected {n} queued waiters, have {}", client.status().pending_waiters)
}

const DRUGS: [&str; 5] = ["lisinopril", "metformin", "atorvastatin", "amlodipine", "omeprazole"];

// -- Scenarios ----------------------------------------------------------------

#[tokio::test]
async fn fan_in_refreshes_once_and_replays_with_new_token() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2"]);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, invalidator) = test_client(addr)?;
    client.login("T1")?;
    let mut events = client.subscribe();

    let requests =
        futures_util::future::join_all(DRUGS.iter().map(|d| client.send(search_request(d))));
    let release = async {
        wait_for_waiters(&client, 5).await?;
        api.release_refreshes(1);
        anyhow::Ok(())
    };
    let (results, released) = tokio::join!(requests, release);
    released?;

    for (drug, result) in DRUGS.iter().zip(results) {
        let body: serde_json::Value = result?.json()?;
        assert_eq!(body["name"], *drug);
        assert_eq!(body["auth"], "Bearer T2");
    }
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(api.seen_with("T1"), 5);
    assert_eq!(api.seen_with("T2"), 5);
    assert_eq!(invalidator.calls(), 0);
    assert_eq!(events.try_recv()?, SessionEvent::TokenRefreshed { cycle: 1, waiters: 5 });
    assert_eq!(client.tokens().get().map(|t| t.expose().to_owned()), Some("T2".to_owned()));
    Ok(())
}

#[tokio::test]
async fn fan_in_failure_rejects_all_and_invalidates_once() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2"]);
    api.refresh_status.store(500, Ordering::Release);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, invalidator) = test_client(addr)?;
    client.login("T1")?;

    let requests =
        futures_util::future::join_all(DRUGS.iter().map(|d| client.send(search_request(d))));
    let release = async {
        wait_for_waiters(&client, 5).await?;
        api.release_refreshes(1);
        anyhow::Ok(())
    };
    let (results, released) = tokio::join!(requests, release);
    released?;

    for result in results {
        assert!(matches!(result, Err(ClientError::RefreshFailure { .. })), "{result:?}");
    }
    assert_eq!(api.refresh_calls(), 1);
    // No replays: only the five original attempts reached the API.
    assert_eq!(api.seen.lock().len(), 5);
    assert!(client.tokens().get().is_none());
    assert_eq!(invalidator.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn late_arrival_starts_a_new_cycle() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2", "T3"]);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, _invalidator) = test_client(addr)?;
    client.login("T1")?;
    api.release_refreshes(2);

    let first = client.send(search_request("lisinopril")).await?;
    assert_eq!(first.json::<serde_json::Value>()?["auth"], "Bearer T2");
    assert!(!client.status().refreshing);

    // Server-side expiry of T2 after the first cycle settled.
    api.revoke();
    let late = client.send(search_request("metformin")).await?;
    assert_eq!(late.json::<serde_json::Value>()?["auth"], "Bearer T3");

    assert_eq!(api.refresh_calls(), 2);
    assert_eq!(client.status().refresh_cycles, 2);
    Ok(())
}

#[tokio::test]
async fn rejected_replay_is_retry_exhausted() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2", "T3"]);
    api.reject_all.store(true, Ordering::Release);
    api.release_refreshes(10);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, invalidator) = test_client(addr)?;
    client.login("T1")?;

    let result = client.send(search_request("lisinopril")).await;
    assert_eq!(result.err(), Some(ClientError::RetryExhausted));
    assert_eq!(api.refresh_calls(), 1, "a replay must never trigger a second refresh");
    assert_eq!(api.seen_with("T2"), 1);
    assert_eq!(invalidator.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn new_requests_use_refreshed_token_directly() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2"]);
    api.release_refreshes(1);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, _invalidator) = test_client(addr)?;
    client.login("T1")?;

    client.send(search_request("lisinopril")).await?;
    let before = api.seen.lock().len();

    let fresh = client.send(search_request("metformin")).await?;
    assert_eq!(fresh.json::<serde_json::Value>()?["auth"], "Bearer T2");
    assert_eq!(api.seen.lock().len(), before + 1, "no 401 round trip for new requests");
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(client.status().refresh_cycles, 1);
    Ok(())
}

#[tokio::test]
async fn non_auth_failures_bypass_the_coordinator() -> anyhow::Result<()> {
    let api = MockApi::new(Some("T1"), &[]);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, _invalidator) = test_client(addr)?;
    client.login("T1")?;

    let result = client.send(ApiRequest::get("/api/reports/broken")).await;
    match result {
        Err(ClientError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("unavailable"));
        }
        other => anyhow::bail!("expected status error, got {other:?}"),
    }
    assert_eq!(api.refresh_calls(), 0);
    assert_eq!(client.status().refresh_cycles, 0);
    Ok(())
}

#[tokio::test]
async fn transport_failure_is_network_error() -> anyhow::Result<()> {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };
    let (client, _invalidator) = test_client(addr)?;
    client.login("T1")?;

    let result = client.send(search_request("lisinopril")).await;
    assert!(matches!(result, Err(ClientError::Network(_))), "{result:?}");
    assert_eq!(client.status().refresh_cycles, 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_waiter_is_not_replayed() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2"]);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, _invalidator) = test_client(addr)?;
    client.login("T1")?;

    let cancel = CancellationToken::new();
    let cancelled = client.send_with_cancel(search_request("lisinopril"), &cancel);
    let others = futures_util::future::join_all(
        DRUGS[1..3].iter().map(|d| client.send(search_request(d))),
    );
    let driver = async {
        wait_for_waiters(&client, 3).await?;
        cancel.cancel();
        // Give the cancelled caller a moment to observe cancellation.
        tokio::time::sleep(Duration::from_millis(20)).await;
        api.release_refreshes(1);
        anyhow::Ok(())
    };
    let (cancelled, others, driven) = tokio::join!(cancelled, others, driver);
    driven?;

    assert_eq!(cancelled.err(), Some(ClientError::Cancelled));
    for result in others {
        assert_eq!(result?.json::<serde_json::Value>()?["auth"], "Bearer T2");
    }
    assert_eq!(api.seen_with("T2"), 2, "cancelled waiter must not replay");
    assert_eq!(api.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn explicit_refresh_joins_the_in_flight_cycle() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2", "T3"]);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, _invalidator) = test_client(addr)?;
    client.login("T1")?;

    let request = client.send(search_request("lisinopril"));
    let manual = async {
        wait_for_waiters(&client, 1).await?;
        let refreshing = client.refresh();
        let release = async {
            wait_for_waiters(&client, 2).await?;
            api.release_refreshes(1);
            anyhow::Ok(())
        };
        let (token, released) = tokio::join!(refreshing, release);
        released?;
        anyhow::Ok(token?)
    };
    let (response, token) = tokio::join!(request, manual);

    assert_eq!(token?.expose(), "T2");
    assert_eq!(response?.json::<serde_json::Value>()?["auth"], "Bearer T2");
    assert_eq!(api.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_token_recovers_through_refresh() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2"]);
    api.release_refreshes(1);
    let addr = spawn_api(Arc::clone(&api)).await?;
    let (client, _invalidator) = test_client(addr)?;

    let resp = client.send(search_request("lisinopril")).await?;
    assert_eq!(resp.json::<serde_json::Value>()?["auth"], "Bearer T2");
    assert_eq!(api.seen.lock().first().cloned(), Some(None));
    Ok(())
}

#[tokio::test]
async fn refresh_without_token_expires_the_session() -> anyhow::Result<()> {
    let api = MockApi::new(None, &[]);
    api.release_refreshes(1);
    let addr = spawn_api(Arc::clone(&api)).await?;

    let dir = tempfile::tempdir()?;
    let mut config = ClientConfig::new(format!("http://{addr}"));
    config.state_dir = Some(dir.path().to_path_buf());
    config.login_url = "https://pricing.example.com/login".to_owned();
    let client = ApiClient::new(&config)?;
    client.login("T1")?;
    assert!(dir.path().join("session.json").exists());
    let mut events = client.subscribe();

    let result = client.send(search_request("lisinopril")).await;
    assert!(matches!(result, Err(ClientError::RefreshFailure { .. })), "{result:?}");
    assert!(client.tokens().get().is_none());
    assert!(!dir.path().join("session.json").exists());
    match events.try_recv()? {
        SessionEvent::SessionExpired { login_url, reason } => {
            assert_eq!(login_url, "https://pricing.example.com/login");
            assert!(reason.contains("no access token"), "{reason}");
        }
        other => anyhow::bail!("unexpected event: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn persisted_session_is_restored_by_a_new_client() -> anyhow::Result<()> {
    let api = MockApi::new(Some("T1"), &[]);
    let addr = spawn_api(Arc::clone(&api)).await?;

    let dir = tempfile::tempdir()?;
    let mut config = ClientConfig::new(format!("http://{addr}"));
    config.state_dir = Some(dir.path().to_path_buf());

    ApiClient::new(&config)?.login("T1")?;
    let restored = ApiClient::new(&config)?;
    let resp = restored.send(search_request("lisinopril")).await?;
    assert_eq!(resp.json::<serde_json::Value>()?["auth"], "Bearer T1");
    assert_eq!(api.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn injected_redirect_expires_again_after_cookie_recovery() -> anyhow::Result<()> {
    let api = MockApi::new(None, &["T2"]);
    api.refresh_status.store(500, Ordering::Release);
    api.release_refreshes(3);
    let addr = spawn_api(Arc::clone(&api)).await?;

    let config = ClientConfig::new(format!("http://{addr}"));
    let tokens = Arc::new(TokenStore::in_memory());
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let redirect = Arc::new(LoginRedirect::new("/login", Arc::clone(&tokens), event_tx.clone()));
    let client = ApiClient::with_parts(
        &config,
        tokens,
        Arc::clone(&redirect) as Arc<dyn SessionInvalidator>,
        None,
        event_tx,
    )?;
    let mut events = client.subscribe();

    let first = client.send(search_request("lisinopril")).await;
    assert!(matches!(first, Err(ClientError::RefreshFailure { .. })), "{first:?}");
    assert!(matches!(events.try_recv()?, SessionEvent::SessionExpired { .. }));

    // No login: the refresh cookie alone restores the session.
    api.refresh_status.store(200, Ordering::Release);
    let resp = client.send(search_request("metformin")).await?;
    assert_eq!(resp.json::<serde_json::Value>()?["auth"], "Bearer T2");
    assert!(matches!(events.try_recv()?, SessionEvent::TokenRefreshed { .. }));
    assert!(!redirect.has_fired());

    api.revoke();
    let last = client.send(search_request("atorvastatin")).await;
    assert!(matches!(last, Err(ClientError::RefreshFailure { .. })), "{last:?}");
    assert!(matches!(events.try_recv()?, SessionEvent::SessionExpired { .. }));
    assert_eq!(api.refresh_calls(), 3);
    Ok(())
}
