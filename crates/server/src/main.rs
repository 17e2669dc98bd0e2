// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use axon::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    match config.log_format.as_str() {
        "text" => tracing_subscriber::fmt().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    if let Err(e) = axon::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
