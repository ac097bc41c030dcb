// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use rxdesk::command::{execute, Command};
use rxdesk::{ApiClient, ClientConfig, ClientError};

/// Authenticated command line client for the drug-pricing API.
#[derive(Debug, Parser)]
#[command(name = "rxdesk", version)]
struct Cli {
    #[command(flatten)]
    client: ClientConfig,

    /// Log filter (e.g. `info`, `rxdesk=debug`).
    #[arg(long, default_value = "warn", env = "RXDESK_LOG_LEVEL")]
    log_level: String,

    /// Log format: `text` or `json`.
    #[arg(long, default_value = "text", env = "RXDESK_LOG_FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.client.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli.log_level, &cli.log_format);

    let client = match ApiClient::new(&cli.client) {
        Ok(c) => c,
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    };

    match execute(&client, cli.command).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            match e.downcast_ref::<ClientError>() {
                Some(ce) => eprintln!("error: {}: {ce}", ce.code()),
                None => eprintln!("error: {e:#}"),
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(level: &str, format: &str) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match format {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}
