//! Tidepool Token Agent
//!
//! Long-running local service that:
//! 1. Loads realm, client and refresh token configuration
//! 2. Keeps a Tidepool access token warm through `TokenManager`
//! 3. Serves the current token on `GET /token` to local tools
//! 4. Reports manager state on `/health` and Prometheus metrics on `/metrics`

mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use std::time::Duration;
use tidepool_auth::HttpTokenClient;
use tidepool_token::{CloseReason, ManagerStatus, TokenEvent, TokenManager};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    manager: TokenManager,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds concurrently handled requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/token", get(token_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting tidepool-token-agent");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let client_config = config
        .tidepool
        .client_config()
        .context("invalid tidepool client configuration")?;
    let refresh_token = config
        .tidepool
        .refresh_token
        .clone()
        .context("refresh token not resolved")?;

    info!(
        listen_addr = %config.server.listen_addr,
        environment = %client_config.environment(),
        client_id = client_config.client_id(),
        token_endpoint = client_config.token_endpoint(),
        policy = ?config.refresh.policy,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(config.refresh.http_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let manager = TokenManager::with_tokio(
        Arc::new(HttpTokenClient::new(http)),
        config.refresh.manager_options(),
    );

    // Subscribe before start so the first events are not missed
    let watcher = tokio::spawn(watch_manager(manager.clone(), manager.subscribe()));
    manager.start(client_config, refresh_token);

    let app_state = AppState {
        manager: manager.clone(),
        prometheus: prometheus_handle,
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    // Either an OS signal or the manager closing on its own ends the agent
    let fatal = tokio::select! {
        _ = shutdown_signal() => None,
        reason = watcher => reason.ok().flatten(),
    };

    let _ = shutdown_tx.send(());

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    manager.close();

    if let Some(reason) = fatal {
        anyhow::bail!("token manager closed: {}", reason.label());
    }
    info!("shutdown complete");
    Ok(())
}

/// Follow manager events until it closes.
///
/// Returns the close reason for closes the agent did not request, and `None`
/// for a requested close or once the event stream ends. After a lag the
/// manager's status stands in for whatever events were skipped.
async fn watch_manager(
    manager: TokenManager,
    mut events: broadcast::Receiver<TokenEvent>,
) -> Option<CloseReason> {
    loop {
        match events.recv().await {
            Ok(TokenEvent::Closed { epoch, reason }) => return closed(Some(epoch), reason),
            Ok(event) => debug!(?event, "token manager event"),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "token event watcher lagged");
                if let Some(reason) = manager.close_reason() {
                    return closed(None, reason);
                }
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn closed(epoch: Option<u64>, reason: CloseReason) -> Option<CloseReason> {
    if reason == CloseReason::Requested {
        debug!(?epoch, "token manager closed on request");
        return None;
    }
    error!(
        ?epoch,
        reason = reason.label(),
        "token manager closed, agent can no longer serve tokens"
    );
    Some(reason)
}

/// JSON error body: {"error":{"type":"...","message":"..."}}
fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Current access token. Waits for a refresh when the cached one expired.
async fn token_handler(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let result = state.manager.access_token().await;
    metrics::record_token_wait(started.elapsed().as_secs_f64());

    match result {
        Ok(token) => {
            let expires_in = state
                .manager
                .snapshot()
                .map(|s| s.access_remaining(Instant::now()).as_secs())
                .unwrap_or(0);
            metrics::record_request("token", 200);
            let body = serde_json::json!({
                "access_token": token,
                "expires_in": expires_in,
            });
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/json"),
                    (header::CACHE_CONTROL, "no-store"),
                ],
                body.to_string(),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "unable to serve access token");
            metrics::record_request("token", 503);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.label(), &e.to_string())
        }
    }
}

/// Manager status as JSON. 200 while a valid token is cached, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.manager.status();
    let expires_in = state
        .manager
        .snapshot()
        .map(|s| s.access_remaining(Instant::now()).as_secs());

    let code = if status == ManagerStatus::Valid {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    metrics::record_request("health", code.as_u16());

    let body = serde_json::json!({
        "status": status,
        "access_token_expires_in": expires_in,
    });
    (
        code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
