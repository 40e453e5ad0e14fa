//! Token-exchange relay for browser clients.
//!
//! IGDB cannot be called from a browser: its API blocks cross-origin
//! requests, and the Twitch client secret must never ship to clients.
//! The relay keeps the secret server-side, exchanges it for app access
//! tokens and forwards APICalypse query bodies to the real API, applying
//! the same rate limit an adapter would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::media::Source;
use crate::oauth::ClientCredentials;

/// Longest endpoint name the relay will forward. Real IGDB endpoints are
/// short words like `games` or `release_dates`.
const MAX_ENDPOINT_LEN: usize = 32;

/// Shared relay state.
#[derive(Clone)]
pub struct RelayContext {
    pub http: reqwest::Client,
    pub credentials: Arc<ClientCredentials>,
    pub limiter: Arc<RateLimiter>,
    pub api_base: String,
    pub timeout: Duration,
}

impl RelayContext {
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = config.provider(Source::Igdb);
        let http = config.http_client()?;
        let token_url = provider
            .token_url
            .clone()
            .context("IGDB token URL is not set")?;

        let credentials = Arc::new(ClientCredentials::new(
            http.clone(),
            token_url,
            provider.client_id.clone().unwrap_or_default(),
            provider.client_secret.clone().unwrap_or_default(),
            provider.timeout,
        ));

        Ok(Self {
            http,
            credentials,
            limiter: Arc::new(RateLimiter::new(provider.max_requests, provider.interval)),
            api_base: provider.base_url.trim_end_matches('/').to_string(),
            timeout: provider.timeout,
        })
    }
}

/// Relayed query as the client sends it.
#[derive(Debug, Deserialize)]
pub struct ProxyRequest {
    /// API endpoint to forward to, e.g. `games`.
    pub endpoint: String,
    /// Raw APICalypse query body.
    pub query: String,
}

/// Create the Axum router with all relay routes.
pub fn create_router(ctx: RelayContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/proxy/igdb", post(proxy_igdb))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Endpoint names come from the client, so only a single plain path
/// segment may pass. Anything else could redirect the query elsewhere on
/// the upstream host.
fn valid_endpoint(endpoint: &str) -> bool {
    !endpoint.is_empty()
        && endpoint.len() <= MAX_ENDPOINT_LEN
        && endpoint
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn proxy_igdb(
    State(ctx): State<RelayContext>,
    Json(request): Json<ProxyRequest>,
) -> Response {
    if !valid_endpoint(&request.endpoint) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid endpoint name");
    }

    if !ctx.credentials.is_configured() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Twitch credentials are not configured",
        );
    }

    // The deadline covers the token exchange, the rate-limiter wait and
    // the upstream call, same as an adapter request.
    match tokio::time::timeout(ctx.timeout, forward(&ctx, &request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(endpoint = %request.endpoint, "relay deadline exceeded");
            error_response(StatusCode::GATEWAY_TIMEOUT, "Upstream deadline exceeded")
        }
    }
}

async fn forward(ctx: &RelayContext, request: &ProxyRequest) -> Response {
    let token = match ctx.credentials.bearer().await {
        Ok(token) => token,
        Err(error) => {
            tracing::warn!(%error, "relay token exchange failed");
            return error_response(StatusCode::BAD_GATEWAY, "Token exchange failed");
        }
    };

    ctx.limiter.acquire().await;

    let url = format!("{}/{}", ctx.api_base, request.endpoint);
    let upstream = match ctx
        .http
        .post(&url)
        .header("Client-ID", ctx.credentials.client_id())
        .bearer_auth(&token)
        .header("Content-Type", "text/plain")
        .body(request.query.clone())
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(%error, endpoint = %request.endpoint, "relay upstream unreachable");
            return error_response(StatusCode::BAD_GATEWAY, "Upstream unreachable");
        }
    };

    let status = upstream.status();
    if !status.is_success() {
        tracing::warn!(
            status = status.as_u16(),
            endpoint = %request.endpoint,
            "relay upstream rejected query"
        );
        let passthrough =
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        return error_response(
            passthrough,
            &format!("Upstream returned {}", status.as_u16()),
        );
    }

    match upstream.json::<serde_json::Value>().await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(error) => {
            tracing::warn!(%error, "relay upstream returned malformed JSON");
            error_response(StatusCode::BAD_GATEWAY, "Upstream returned malformed JSON")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

/// Start the relay HTTP server.
pub async fn serve(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.relay.host, config.relay.port)
        .parse()
        .context("Invalid relay address")?;

    let ctx = RelayContext::from_config(&config)?;
    if !ctx.credentials.is_configured() {
        tracing::warn!("Twitch credentials missing, /proxy/igdb will reject requests");
    }

    let app = create_router(ctx);

    tracing::info!("Starting relay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Relay shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
