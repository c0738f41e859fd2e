//! Market-index feed server.
//!
//! This binary logs into an upstream market-data provider, polls a fixed set
//! of index quotes on a short interval into an in-memory table, and serves
//! that table (plus a few passthrough endpoints) over HTTP for a frontend to
//! consume. It wires together three building blocks:
//!
//! - A `QuoteSource` provider — either the brokerage trading API (TOTP
//!   login, token triple, portfolio endpoints) or the simpler market-data
//!   vendor (bearer token, per-symbol quotes, simulated fallback) — selected
//!   with `--provider`.
//! - The `Poller` — a background thread that fetches every instrument each
//!   cycle, overwrites the shared `QuoteTable`, and escalates repeated
//!   failures into a re-login (or, for the vendor, a simulated random walk).
//! - The HTTP boundary — an axum router exposing the quote table, health and
//!   status documents, login endpoints, and passthrough portfolio calls.
//!
//! Startup behavior differs by provider: the vendor variant authenticates
//! and starts polling immediately so the API serves (possibly simulated)
//! data from the first request; the brokerage variant stays idle until an
//! operator hits `/login` or `/authenticate`.
//!
//! Credentials are read from the environment; see `config` for the variable
//! names. Example:
//!
//! ```bash
//! BROKER_CLIENT_ID=AB1234 BROKER_PASSWORD=... BROKER_API_KEY=... \
//!     feed_server --provider broker --listen 0.0.0.0:5001
//! ```
#![warn(missing_docs)]
use std::sync::{Arc, Mutex};

use clap::Parser;
use feed_common::{FeedError, Result};
use log::{error, info, warn};

use crate::config::{Args, Config, ProviderKind};
use crate::http::AppState;
use crate::model::quote::QuoteTable;
use crate::poller::PollerSettings;
use crate::provider::{BrokerClient, QuoteSource, VendorClient};

mod config;
mod http;
pub mod model;
mod poller;
mod provider;
mod session;

#[tokio::main]
async fn main() -> Result<(), FeedError> {
    init_logger();
    let args = Args::parse();
    let config = Config::from_env(&args)?;

    let (provider, account_id): (Arc<dyn QuoteSource>, String) = match config.provider {
        ProviderKind::Broker => (
            Arc::new(BrokerClient::new(config.broker.clone())),
            config.broker.client_id.clone(),
        ),
        ProviderKind::Vendor => (
            Arc::new(VendorClient::new(config.vendor.clone())),
            config.vendor.user_id.clone(),
        ),
    };

    let table = Arc::new(Mutex::new(QuoteTable::new(&config.instruments)));
    let state = Arc::new(AppState {
        provider: provider.clone(),
        table,
        poller: Mutex::new(None),
        poller_settings: PollerSettings {
            instruments: config.instruments.clone(),
            interval: config.poll_interval,
            error_threshold: config.error_threshold,
            simulate_on_failure: config.simulate_on_failure,
            volatility: config.volatility,
        },
        public_quote_url: config.public_quote_url.clone(),
        account_id,
    });

    if config.login_on_start {
        let login_provider = provider.clone();
        let login = tokio::task::spawn_blocking(move || login_provider.authenticate(None))
            .await
            .map_err(|e| FeedError::Upstream(format!("Startup login task failed: {}", e)))?;
        if let Err(e) = login {
            warn!("Startup login failed ({}); continuing unauthenticated", e);
        }
        // The vendor variant polls from the start, simulated or not.
        state.ensure_poller();
    } else {
        info!("Waiting for /login before polling starts");
    }

    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);
    info!("Login URL: http://{}/login", config.listen_addr);
    if let Err(e) = axum::serve(listener, app).await {
        error!("HTTP server failed: {}", e);
        return Err(FeedError::Io(e));
    }
    Ok(())
}

fn init_logger() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
