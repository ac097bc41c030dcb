// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rxdesk: authenticated client for the drug-pricing API.
//!
//! Attaches the bearer token to every call and, when the server rejects an
//! expired token, refreshes it exactly once for all affected requests before
//! replaying them.

pub mod client;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod http;
pub mod refresh;
pub mod session;
pub mod token;

pub use client::ApiClient;
pub use config::ClientConfig;
pub use dispatch::{ApiRequest, ApiResponse};
pub use error::{ClientError, ErrorCode};
