//! Upstream market-data providers behind one capability interface.
//!
//! The server can sit on top of two different upstreams that historically had
//! a server each: a brokerage trading API (TOTP login, token triple, LTP and
//! portfolio endpoints) and a simpler market-data vendor (username/password
//! login, bearer token, per-symbol quote endpoint). Both are expressed as
//! `QuoteSource` implementations so the poller and the HTTP boundary never
//! care which one is configured.
//!
//! All calls are blocking `ureq` requests; the async HTTP handlers bridge to
//! them with `spawn_blocking`.

use std::sync::Mutex;
use std::time::Duration;

use feed_common::instruments::InstrumentSpec;
use feed_common::{FeedError, Result};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::{BrokerCredentials, VendorCredentials};
use crate::model::quote::UpstreamQuote;
use crate::session::{self, SessionTokens};

/// Connect/read timeout applied to every upstream call.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability interface over an upstream market-data provider.
///
/// `authenticate` establishes (or replaces) the process-wide session;
/// `fetch_index_quote` is the poller's per-instrument call. The portfolio
/// calls default to "not supported" so providers without those APIs can
/// leave them out.
pub trait QuoteSource: Send + Sync {
    /// Short provider name, for logs and status pages.
    fn name(&self) -> &'static str;

    /// Run the login flow, replacing any stored token set.
    ///
    /// `totp_override` carries a manually supplied one-time code; when absent
    /// the provider generates one from its configured secret if it has one.
    fn authenticate(&self, totp_override: Option<&str>) -> Result<()>;

    /// Whether a session token set is currently held.
    fn is_authenticated(&self) -> bool;

    /// Fetch the latest traded price data for one configured instrument.
    fn fetch_index_quote(&self, spec: &InstrumentSpec) -> Result<UpstreamQuote>;

    /// Fetch an ad-hoc quote for an arbitrary symbol, passed through as-is.
    fn fetch_symbol_quote(&self, symbol: &str) -> Result<Value>;

    /// Current open positions.
    fn positions(&self) -> Result<Value> {
        Err(FeedError::NotFound(format!(
            "{} does not expose a positions API",
            self.name()
        )))
    }

    /// Current holdings.
    fn holdings(&self) -> Result<Value> {
        Err(FeedError::NotFound(format!(
            "{} does not expose a holdings API",
            self.name()
        )))
    }

    /// Order history.
    fn order_book(&self) -> Result<Value> {
        Err(FeedError::NotFound(format!(
            "{} does not expose an order book API",
            self.name()
        )))
    }

    /// Account profile.
    fn profile(&self) -> Result<Value> {
        Err(FeedError::NotFound(format!(
            "{} does not expose a profile API",
            self.name()
        )))
    }
}

/// Map a transport/status error onto the shared error taxonomy.
fn http_err(context: &str, err: ureq::Error) -> FeedError {
    match err {
        ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => {
            FeedError::Auth(format!("{}: upstream rejected the session", context))
        }
        ureq::Error::Status(404, _) => FeedError::NotFound(format!("{}: no such resource", context)),
        ureq::Error::Status(code, _) => {
            FeedError::Upstream(format!("{}: upstream returned HTTP {}", context, code))
        }
        ureq::Error::Transport(transport) => {
            FeedError::Upstream(format!("{}: {}", context, transport))
        }
    }
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
}

// ---------------------------------------------------------------------------
// Brokerage variant
// ---------------------------------------------------------------------------

/// Login response envelope from the brokerage API.
#[derive(Debug, Deserialize)]
struct BrokerLoginResponse {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<BrokerLoginData>,
}

#[derive(Debug, Deserialize)]
struct BrokerLoginData {
    #[serde(rename = "jwtToken")]
    jwt_token: String,
    #[serde(rename = "feedToken")]
    feed_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
}

/// Data envelope around the brokerage's LTP payload.
#[derive(Debug, Deserialize)]
struct BrokerQuoteResponse {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<UpstreamQuote>,
}

/// Client for the brokerage trading API.
///
/// Logs in with client id, password and a generated (or manually supplied)
/// one-time code, then attaches the JWT as a bearer token and the API key as
/// a header on every call.
pub struct BrokerClient {
    agent: ureq::Agent,
    credentials: BrokerCredentials,
    session: Mutex<Option<SessionTokens>>,
}

impl BrokerClient {
    /// Build a client from validated credentials.
    pub fn new(credentials: BrokerCredentials) -> Self {
        BrokerClient {
            agent: agent(),
            credentials,
            session: Mutex::new(None),
        }
    }

    fn tokens(&self) -> Result<SessionTokens> {
        self.session
            .lock()?
            .clone()
            .ok_or_else(|| FeedError::Auth("No active session; login first".to_string()))
    }

    fn get_authed(&self, path: &str) -> Result<Value> {
        let tokens = self.tokens()?;
        let url = format!("{}{}", self.credentials.base_url, path);
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", tokens.auth_token))
            .set("X-Api-Key", &self.credentials.api_key)
            .call()
            .map_err(|e| http_err(path, e))?;
        Ok(response.into_json()?)
    }
}

impl QuoteSource for BrokerClient {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn authenticate(&self, totp_override: Option<&str>) -> Result<()> {
        let totp = match totp_override {
            Some(code) => code.to_string(),
            None => match &self.credentials.totp_secret {
                Some(secret) => session::totp_now(secret)?,
                None => {
                    return Err(FeedError::Auth(
                        "No TOTP secret configured and no code supplied".to_string(),
                    ));
                }
            },
        };

        let url = format!("{}/session/login", self.credentials.base_url);
        let response: BrokerLoginResponse = self
            .agent
            .post(&url)
            .set("X-Api-Key", &self.credentials.api_key)
            .send_json(json!({
                "clientcode": self.credentials.client_id,
                "password": self.credentials.password,
                "totp": totp,
            }))
            .map_err(|e| http_err("login", e))?
            .into_json()?;

        if !response.status {
            let message = response
                .message
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(FeedError::Auth(message));
        }
        let data = response
            .data
            .ok_or_else(|| FeedError::Auth("Login response carried no token data".to_string()))?;

        let mut session = self.session.lock()?;
        *session = Some(SessionTokens {
            auth_token: data.jwt_token,
            feed_token: data.feed_token,
            refresh_token: data.refresh_token,
        });
        info!("✓ Authenticated with the brokerage API as {}", self.credentials.client_id);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn fetch_index_quote(&self, spec: &InstrumentSpec) -> Result<UpstreamQuote> {
        let tokens = self.tokens()?;
        let url = format!("{}/market/ltp", self.credentials.base_url);
        let response: BrokerQuoteResponse = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", tokens.auth_token))
            .set("X-Api-Key", &self.credentials.api_key)
            .send_json(json!({
                "exchange": spec.exchange,
                "tradingsymbol": spec.symbol,
                "symboltoken": spec.token,
            }))
            .map_err(|e| http_err(spec.symbol, e))?
            .into_json()?;

        if !response.status {
            let message = response
                .message
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(FeedError::Upstream(format!("{}: {}", spec.symbol, message)));
        }
        response
            .data
            .ok_or_else(|| FeedError::Upstream(format!("{}: empty LTP payload", spec.symbol)))
    }

    fn fetch_symbol_quote(&self, symbol: &str) -> Result<Value> {
        self.get_authed(&format!("/market/quote/{}", symbol))
    }

    fn positions(&self) -> Result<Value> {
        self.get_authed("/portfolio/positions")
    }

    fn holdings(&self) -> Result<Value> {
        self.get_authed("/portfolio/holdings")
    }

    fn order_book(&self) -> Result<Value> {
        self.get_authed("/orders/book")
    }

    fn profile(&self) -> Result<Value> {
        let tokens = self.tokens()?;
        let url = format!("{}/user/profile", self.credentials.base_url);
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", tokens.auth_token))
            .set("X-Api-Key", &self.credentials.api_key)
            .set("X-Refresh-Token", &tokens.refresh_token)
            .call()
            .map_err(|e| http_err("profile", e))?;
        Ok(response.into_json()?)
    }
}

// ---------------------------------------------------------------------------
// Market-data vendor variant
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VendorLoginResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Client for the market-data vendor API.
///
/// Username/password login yields a single bearer token. A 401 on a data
/// call is taken as token expiry: the client re-authenticates once and
/// retries before giving up.
pub struct VendorClient {
    agent: ureq::Agent,
    credentials: VendorCredentials,
    session: Mutex<Option<SessionTokens>>,
}

impl VendorClient {
    /// Build a client from validated credentials.
    pub fn new(credentials: VendorCredentials) -> Self {
        VendorClient {
            agent: agent(),
            credentials,
            session: Mutex::new(None),
        }
    }

    fn bearer(&self) -> Result<String> {
        let held = self.session.lock()?.clone();
        match held {
            Some(tokens) => Ok(tokens.auth_token),
            None => {
                warn!("No vendor token held; attempting login before the data call");
                self.authenticate(None)?;
                self.session
                    .lock()?
                    .clone()
                    .map(|tokens| tokens.auth_token)
                    .ok_or_else(|| FeedError::Auth("Vendor login stored no token".to_string()))
            }
        }
    }

    /// GET a vendor path with the bearer token, re-authenticating once on 401.
    fn get_with_retry(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.credentials.base_url, path);
        let token = self.bearer()?;
        let first = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", token))
            .call();

        match first {
            Ok(response) => Ok(response.into_json()?),
            Err(ureq::Error::Status(401, _)) => {
                info!("Vendor token expired, re-authenticating");
                self.authenticate(None)?;
                let token = self.bearer()?;
                let response = self
                    .agent
                    .get(&url)
                    .set("Authorization", &format!("Bearer {}", token))
                    .call()
                    .map_err(|e| http_err(path, e))?;
                Ok(response.into_json()?)
            }
            Err(e) => Err(http_err(path, e)),
        }
    }
}

impl QuoteSource for VendorClient {
    fn name(&self) -> &'static str {
        "vendor"
    }

    fn authenticate(&self, _totp_override: Option<&str>) -> Result<()> {
        let url = format!("{}/auth/login", self.credentials.base_url);
        let response: VendorLoginResponse = self
            .agent
            .post(&url)
            .send_json(json!({
                "username": self.credentials.user_id,
                "password": self.credentials.password,
            }))
            .map_err(|e| http_err("login", e))?
            .into_json()?;

        let token = response
            .token
            .ok_or_else(|| FeedError::Auth("Vendor login returned no token".to_string()))?;
        let mut session = self.session.lock()?;
        *session = Some(SessionTokens::bearer(token));
        info!("✓ Authenticated with the data vendor as {}", self.credentials.user_id);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn fetch_index_quote(&self, spec: &InstrumentSpec) -> Result<UpstreamQuote> {
        let payload = self.get_with_retry(&format!("/quotes/{}", spec.code))?;
        Ok(serde_json::from_value(payload)?)
    }

    fn fetch_symbol_quote(&self, symbol: &str) -> Result<Value> {
        self.get_with_retry(&format!("/quotes/{}", symbol))
    }
}

// ---------------------------------------------------------------------------
// Public fallback for ad-hoc symbol quotes
// ---------------------------------------------------------------------------

/// Fetch a quote for `symbol` from the public, unauthenticated quote API.
///
/// Used by the HTTP boundary when the primary provider fails on an ad-hoc
/// symbol lookup. A 404 from the public API maps to `NotFound` so the
/// handler can answer 404 rather than a generic error.
pub fn fetch_public_quote(base_url: &str, symbol: &str) -> Result<Value> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), symbol);
    let response = agent()
        .get(&url)
        .call()
        .map_err(|e| match e {
            ureq::Error::Status(404, _) => FeedError::NotFound(format!("Symbol not found: {}", symbol)),
            other => http_err(symbol, other),
        })?;
    Ok(response.into_json()?)
}
