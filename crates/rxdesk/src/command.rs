// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `login`, `logout`, `status`, `refresh`, `call`.

use reqwest::Method;
use serde_json::json;

use crate::client::ApiClient;
use crate::dispatch::ApiRequest;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Store an access token obtained from the login flow.
    Login(LoginArgs),
    /// Forget the stored access token.
    Logout,
    /// Show session state.
    Status,
    /// Renew the access token now.
    Refresh,
    /// Make an authenticated API call.
    Call(CallArgs),
}

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    /// Access token.
    #[arg(long, env = "RXDESK_TOKEN", hide_env_values = true)]
    pub token: String,
}

#[derive(Debug, clap::Args)]
pub struct CallArgs {
    /// HTTP method (GET, POST, PUT, DELETE, ...).
    pub method: String,
    /// Target path, e.g. `/api/drugs/search`.
    pub path: String,
    /// Query parameter as `key=value` (repeatable).
    #[arg(long = "query", short = 'q')]
    pub query: Vec<String>,
    /// JSON request body.
    #[arg(long)]
    pub body: Option<String>,
}

impl CallArgs {
    pub fn to_request(&self) -> anyhow::Result<ApiRequest> {
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid HTTP method: {}", self.method))?;
        let mut request = ApiRequest::new(method, self.path.clone());
        for pair in &self.query {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("query must be key=value: {pair}"))?;
            request = request.with_query(key, value);
        }
        if let Some(ref body) = self.body {
            request = request.with_body(serde_json::from_str(body)?);
        }
        Ok(request)
    }
}

/// Run `command` against `client` and return its JSON output.
pub async fn execute(client: &ApiClient, command: Command) -> anyhow::Result<serde_json::Value> {
    match command {
        Command::Login(args) => {
            client.login(&args.token)?;
            Ok(json!({ "signed_in": true }))
        }
        Command::Logout => {
            client.logout();
            Ok(json!({ "signed_in": false }))
        }
        Command::Status => Ok(serde_json::to_value(client.status())?),
        Command::Refresh => {
            client.refresh().await?;
            Ok(json!({ "refreshed": true, "cycles": client.status().refresh_cycles }))
        }
        Command::Call(args) => {
            let request = args.to_request()?;
            let resp = client.send(request).await?;
            Ok(resp.value().unwrap_or_else(|_| serde_json::Value::String(resp.text())))
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
