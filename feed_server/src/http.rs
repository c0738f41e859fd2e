//! HTTP boundary: JSON endpoints for the frontend plus informational pages.
//!
//! Handlers are thin request/response mappings over the shared state. Every
//! upstream call is bridged through `spawn_blocking` (the provider clients
//! are blocking) and every failure is flattened into a `{"error": ...}` JSON
//! body: 401 for authentication, 404 for unknown symbols, 500 otherwise.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use feed_common::{FeedError, Result};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};

use crate::poller::{Poller, PollerHandle, PollerSettings};
use crate::provider::{self, QuoteSource};
use crate::model::quote::QuoteTable;

/// Shared state handed to every handler.
pub struct AppState {
    /// The configured upstream provider.
    pub provider: Arc<dyn QuoteSource>,
    /// Live quote cache written by the poller.
    pub table: Arc<Mutex<QuoteTable>>,
    /// Slot for the running poller, so login can start it exactly once.
    pub poller: Mutex<Option<PollerHandle>>,
    /// Settings a freshly started poller is given.
    pub poller_settings: PollerSettings,
    /// Public quote API used as the ad-hoc symbol fallback.
    pub public_quote_url: Option<String>,
    /// Account identifier shown on status pages.
    pub account_id: String,
}

impl AppState {
    /// Start the poller if it is not already running.
    pub fn ensure_poller(&self) {
        let Ok(mut slot) = self.poller.lock() else {
            warn!("Poller slot mutex poisoned; not starting a poller");
            return;
        };
        let running = slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        if !running {
            let poller = Poller::new(
                self.provider.clone(),
                self.table.clone(),
                self.poller_settings.clone(),
            );
            *slot = Some(poller.start());
        }
    }
}

/// Error wrapper that renders as the generic JSON error body.
pub struct ApiError(FeedError);

impl From<FeedError> for ApiError {
    fn from(err: FeedError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FeedError::Auth(_) => StatusCode::UNAUTHORIZED,
            FeedError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Run a blocking provider call off the async runtime.
async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| FeedError::Upstream(format!("Worker task failed: {}", e)))?
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(home))
        .route("/login", get(login))
        .route("/authenticate", post(authenticate))
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/indices", get(indices))
        .route("/api/quote/:symbol", get(symbol_quote))
        .route("/api/positions", get(positions))
        .route("/api/holdings", get(holdings))
        .route("/api/orderbook", get(order_book))
        .route("/api/profile", get(profile))
        .layer(cors)
        .with_state(state)
}

async fn indices(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let table = state.table.lock().map_err(FeedError::from)?;
    Ok(Json(json!(table.snapshot())))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let (snapshot, data_available) = {
        let table = state.table.lock().map_err(FeedError::from)?;
        (table.snapshot(), table.data_available())
    };
    Ok(Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "authenticated": state.provider.is_authenticated(),
        "clientId": state.account_id,
        "dataAvailable": data_available,
        "indices": snapshot,
    })))
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let names = state.table.lock().map_err(FeedError::from)?.names();
    Ok(Json(json!({
        "authenticated": state.provider.is_authenticated(),
        "timestamp": Utc::now().to_rfc3339(),
        "symbols": names,
    })))
}

async fn symbol_quote(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let provider = state.provider.clone();
    let primary_symbol = symbol.clone();
    let primary = blocking(move || provider.fetch_symbol_quote(&primary_symbol)).await;

    match primary {
        Ok(payload) => Ok(Json(payload)),
        Err(primary_err) => {
            let Some(base_url) = state.public_quote_url.clone() else {
                return Err(primary_err.into());
            };
            warn!(
                "Primary quote lookup for {} failed ({}); trying the public API",
                symbol, primary_err
            );
            let payload =
                blocking(move || provider::fetch_public_quote(&base_url, &symbol)).await?;
            Ok(Json(payload))
        }
    }
}

async fn positions(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let provider = state.provider.clone();
    Ok(Json(blocking(move || provider.positions()).await?))
}

async fn holdings(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let provider = state.provider.clone();
    Ok(Json(blocking(move || provider.holdings()).await?))
}

async fn order_book(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let provider = state.provider.clone();
    Ok(Json(blocking(move || provider.order_book()).await?))
}

async fn profile(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let provider = state.provider.clone();
    Ok(Json(blocking(move || provider.profile()).await?))
}

/// Body accepted by `POST /authenticate`.
#[derive(Debug, Default, Deserialize)]
pub struct AuthenticateRequest {
    /// Manually supplied one-time code, overriding the configured secret.
    #[serde(default)]
    pub totp: Option<String>,
}

async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthenticateRequest>,
) -> Response {
    let provider = state.provider.clone();
    let result = blocking(move || provider.authenticate(request.totp.as_deref())).await;

    match result {
        Ok(()) => {
            state.ensure_poller();
            Json(json!({ "success": true })).into_response()
        }
        Err(e) => {
            warn!("Authentication failed: {}", e);
            let status = match e {
                FeedError::Auth(_) => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "success": false, "error": e.to_string() }))).into_response()
        }
    }
}

async fn login(State(state): State<Arc<AppState>>) -> Response {
    let provider = state.provider.clone();
    let result = blocking(move || provider.authenticate(None)).await;

    match result {
        Ok(()) => {
            state.ensure_poller();
            info!("Login succeeded, live polling active");
            Html(login_success_page()).into_response()
        }
        Err(e) => {
            warn!("Login failed: {}", e);
            let status = match e {
                FeedError::Auth(_) => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Html(login_failure_page(&e.to_string()))).into_response()
        }
    }
}

async fn home(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let snapshot = {
        let table = state.table.lock().map_err(FeedError::from)?;
        table.snapshot()
    };
    let authenticated = state.provider.is_authenticated();
    let table_json = serde_json::to_string_pretty(&snapshot).map_err(FeedError::from)?;
    Ok(Html(home_page(
        state.provider.name(),
        &state.account_id,
        authenticated,
        &table_json,
    )))
}

fn login_success_page() -> String {
    "<html>\n<head><title>Authentication Successful</title></head>\n<body style=\"font-family: Arial; text-align: center; padding: 50px; background: #0f172a; color: white;\">\n<h1 style=\"color: #22c55e;\">&#10003; Authentication Successful</h1>\n<p>Live data is now streaming.</p>\n<p>You can close this window and check the dashboard.</p>\n</body>\n</html>\n"
        .to_string()
}

fn login_failure_page(message: &str) -> String {
    format!(
        "<html>\n<head><title>Authentication Failed</title></head>\n<body style=\"font-family: Arial; text-align: center; padding: 50px; background: #0f172a; color: white;\">\n<h1 style=\"color: #ef4444;\">&#10007; Authentication Failed</h1>\n<p>{}</p>\n<p>Please check the configured credentials.</p>\n</body>\n</html>\n",
        message
    )
}

fn home_page(provider: &str, account_id: &str, authenticated: bool, table_json: &str) -> String {
    let (status_color, status_text) = if authenticated {
        ("#22c55e", "Connected")
    } else {
        ("#ef4444", "Disconnected")
    };
    format!(
        "<html>\n<head><title>Market Feed Server</title><meta http-equiv=\"refresh\" content=\"5\"></head>\n<body style=\"font-family: Arial; background: #0f172a; color: white; padding: 50px;\">\n<h1>Market Feed Server ({provider})</h1>\n<h2 style=\"color: {status_color};\">Status: {status_text}</h2>\n<p>Account: <strong>{account_id}</strong></p>\n<h3>Live data:</h3>\n<pre style=\"background: #1e293b; padding: 20px; border-radius: 8px; overflow-x: auto;\">{table_json}</pre>\n<p><a href=\"/login\" style=\"color: #3b82f6;\">Login</a></p>\n<p><a href=\"/api/indices\" style=\"color: #3b82f6;\">View JSON data</a>\n<a href=\"/api/status\" style=\"color: #3b82f6;\">View status</a></p>\n</body>\n</html>\n"
    )
}
