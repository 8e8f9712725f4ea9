//! Dashboard: Axum server for the control API.
//!
//! Read-only status endpoints over the status tables plus operator
//! triggers (manual cycle, diagnostic phases, safe-mode clear).
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Bind the control API and serve it on a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Control API listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Control API server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Reads
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::get_status))
        .route("/api/cycles", get(routes::get_cycles).post(routes::trigger_cycle))
        .route("/api/runs", get(routes::get_runs))
        .route("/api/refills", get(routes::get_refills))
        // Operator triggers
        .route("/api/phases/:phase", post(routes::trigger_phase))
        .route("/api/safe-mode/clear", post(routes::clear_safe_mode))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
