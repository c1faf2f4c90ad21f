//! Duet server: history, delivery status and presence for one-to-one chat.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5001
//! cargo run --bin duet-server
//!
//! # Custom address and config file
//! cargo run --bin duet-server -- --bind 127.0.0.1:8080 --config duet.toml
//!
//! # Or via environment variable
//! DUET_ADDR=127.0.0.1:8080 cargo run --bin duet-server
//! ```

use std::sync::Arc;

use clap::Parser;
use duet_server::config::{ServerCliArgs, ServerConfig};
use duet_server::server;
use duet_server::state::AppState;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if config.users.is_empty() {
        tracing::warn!("no [[users]] configured; every request will be unauthorized");
    }
    tracing::info!(
        addr = %config.bind_addr,
        users = config.users.len(),
        store_timeout_ms = u64::try_from(config.store_timeout.as_millis()).unwrap_or(u64::MAX),
        "starting duet server"
    );

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::in_memory(config));

    match server::start_server_with_state(&bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "duet server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
