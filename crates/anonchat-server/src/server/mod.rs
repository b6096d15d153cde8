use crate::config::ServerConfig;
use anonchat_core::MatchmakingEngine;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

mod routes;

/// Server application state
pub struct AppState {
    /// Matchmaking engine shared by every connection
    pub engine: MatchmakingEngine,
    /// Effective configuration
    pub config: ServerConfig,
    /// Cancelled when the server starts shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> Self {
        Self {
            engine: MatchmakingEngine::new(),
            config,
            shutdown,
        }
    }
}

/// Start the HTTP server and run until a shutdown signal arrives.
pub async fn start(config: ServerConfig) -> Result<()> {
    let addr = config.socket_addr();
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(config, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    serve(listener, state).await
}

/// Serve the router on an already bound listener until the state's
/// shutdown token is cancelled.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<AppState>) -> Result<()> {
    let stop_token = state.shutdown.clone();
    let app = create_router(state);

    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop_token.cancelled().await;
            info!("HTTP server received shutdown signal, draining connections");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Configure CORS layer.
///
/// Only the configured client origin may call the server cross-origin.
fn configure_cors(origin: &str) -> CorsLayer {
    match origin.parse::<HeaderValue>() {
        Ok(origin) => {
            info!(origin = ?origin, "Configured CORS with allowed client origin");
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
        }
        Err(e) => {
            warn!(error = %e, "Client origin is not a valid header value, denying cross-origin requests");
            CorsLayer::new()
        }
    }
}

/// Create the Axum router with all routes and middleware
fn create_router(state: Arc<AppState>) -> Router {
    let cors = configure_cors(&state.config.client_origin);
    let websocket_router = routes::websocket::router(state.clone());

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/stats", get(stats_handler))
        .with_state(state)
        .merge(websocket_router)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
}

/// Simple health check endpoint (for load balancers)
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "anonchat-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Matchmaking counters (for monitoring)
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.stats())
}
