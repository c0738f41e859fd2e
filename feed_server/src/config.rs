//! Runtime configuration: CLI flags plus environment-sourced credentials.
//!
//! Secrets never live in source; they are read from the environment at
//! startup and validated before anything connects.

use std::env;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use feed_common::{FeedError, Instrument, Result};

use crate::model::simulator::DEFAULT_VOLATILITY;

/// Which upstream the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Brokerage trading API: TOTP login, token triple, portfolio endpoints.
    Broker,
    /// Market-data vendor: bearer token, quote endpoint, simulated fallback.
    Vendor,
}

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Upstream provider to poll quotes from.
    #[clap(long, value_enum, default_value_t = ProviderKind::Broker)]
    pub provider: ProviderKind,

    /// Address the HTTP server binds to.
    #[clap(long, default_value = "0.0.0.0:5001")]
    pub listen: String,

    /// Poll interval in milliseconds.
    #[clap(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Subset of indices to track (default: all of them).
    #[clap(long, value_enum, value_delimiter = ',')]
    pub instruments: Option<Vec<Instrument>>,

    /// Override the provider's default for simulated fallback prices.
    #[clap(long)]
    pub simulate: Option<bool>,
}

/// Credentials and endpoint for the brokerage API, from the environment.
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    /// Brokerage client id (`BROKER_CLIENT_ID`).
    pub client_id: String,
    /// Login password (`BROKER_PASSWORD`).
    pub password: String,
    /// API key issued for this app (`BROKER_API_KEY`).
    pub api_key: String,
    /// Optional base32 TOTP secret (`BROKER_TOTP_SECRET`).
    pub totp_secret: Option<String>,
    /// API base URL (`BROKER_BASE_URL`).
    pub base_url: String,
}

/// Credentials and endpoint for the data vendor, from the environment.
#[derive(Debug, Clone)]
pub struct VendorCredentials {
    /// Vendor user id (`VENDOR_USER_ID`).
    pub user_id: String,
    /// Login password (`VENDOR_PASSWORD`).
    pub password: String,
    /// API base URL (`VENDOR_BASE_URL`).
    pub base_url: String,
}

/// Full runtime configuration after merging CLI flags and environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Selected upstream provider.
    pub provider: ProviderKind,
    /// HTTP bind address.
    pub listen_addr: String,
    /// Instruments the poller tracks.
    pub instruments: Vec<Instrument>,
    /// Fixed interval between poll cycles.
    pub poll_interval: Duration,
    /// Consecutive failed cycles tolerated before escalation.
    pub error_threshold: u32,
    /// Whether failed fetches fall back to simulated prices.
    pub simulate_on_failure: bool,
    /// Per-tick volatility fraction for the simulator.
    pub volatility: f64,
    /// Whether to log in (and start polling) at startup rather than waiting
    /// for the login endpoints.
    pub login_on_start: bool,
    /// Brokerage credentials.
    pub broker: BrokerCredentials,
    /// Vendor credentials.
    pub vendor: VendorCredentials,
    /// Base URL of the public quote API used as the ad-hoc fallback.
    pub public_quote_url: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Merge CLI arguments with environment credentials and validate.
    pub fn from_env(args: &Args) -> Result<Config> {
        let broker = BrokerCredentials {
            client_id: env_or("BROKER_CLIENT_ID", ""),
            password: env_or("BROKER_PASSWORD", ""),
            api_key: env_or("BROKER_API_KEY", ""),
            totp_secret: env_opt("BROKER_TOTP_SECRET"),
            base_url: env_or("BROKER_BASE_URL", "https://api.smartquote.example.com"),
        };
        let vendor = VendorCredentials {
            user_id: env_or("VENDOR_USER_ID", ""),
            password: env_or("VENDOR_PASSWORD", ""),
            base_url: env_or("VENDOR_BASE_URL", "https://api.feeddata.example.com"),
        };

        let config = Config {
            provider: args.provider,
            listen_addr: args.listen.clone(),
            instruments: args
                .instruments
                .clone()
                .filter(|list| !list.is_empty())
                .unwrap_or_else(Instrument::all),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            error_threshold: 5,
            simulate_on_failure: args
                .simulate
                .unwrap_or(args.provider == ProviderKind::Vendor),
            volatility: DEFAULT_VOLATILITY,
            // The vendor variant authenticates and starts polling as soon as
            // the process comes up; the brokerage flow waits for /login.
            login_on_start: args.provider == ProviderKind::Vendor,
            broker,
            vendor,
            public_quote_url: env_opt("PUBLIC_QUOTE_URL")
                .or_else(|| Some("https://query1.finance.yahoo.com/v10/finance/quoteSummary".to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject empty credentials for the selected provider.
    pub fn validate(&self) -> Result<()> {
        match self.provider {
            ProviderKind::Broker => {
                require_non_empty("BROKER_CLIENT_ID", &self.broker.client_id)?;
                require_non_empty("BROKER_PASSWORD", &self.broker.password)?;
                require_non_empty("BROKER_API_KEY", &self.broker.api_key)?;
            }
            ProviderKind::Vendor => {
                require_non_empty("VENDOR_USER_ID", &self.vendor.user_id)?;
                require_non_empty("VENDOR_PASSWORD", &self.vendor.password)?;
            }
        }
        if self.poll_interval.is_zero() {
            return Err(FeedError::Config("Poll interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(FeedError::Config(format!("{} must be set and non-empty", name)))
    } else {
        Ok(())
    }
}
