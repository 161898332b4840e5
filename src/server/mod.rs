//! HTTP and WebSocket front end for the hub.
//!
//! Routes:
//! - `GET /ws?root=<dir>`: change event stream for `root`
//! - `POST /api/open`, `GET /api/tree`: directory listings
//! - `GET /api/file`, `POST /api/file`: file content
//! - `GET /api/status`, `GET /health`

mod api;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::files::LocalFileApi;
use crate::hub::{Hub, HubSettings};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub files: Arc<LocalFileApi>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Self {
        Self {
            hub: Hub::new(HubSettings::from_settings(settings)),
            files: Arc::new(LocalFileApi::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/api/open", post(api::open_directory))
        .route("/api/tree", get(api::list_tree))
        .route("/api/file", get(api::read_file).post(api::write_file))
        .route("/api/status", get(api::status))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener until the listener fails.
pub async fn run(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

/// Bind per `settings` and serve until Ctrl+C.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let bind = settings.server.bind.clone();
    let state = AppState::new(&settings);

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let addr = listener.local_addr()?;

    crate::log_event!(
        "server",
        "listening",
        "http://{addr} (max {} connections, debounce {:?})",
        settings.server.max_connections,
        settings.watch.debounce()
    );
    eprintln!("tabsync hub listening on http://{addr}");
    eprintln!("WebSocket endpoint: ws://{addr}/ws?root=<directory>");
    eprintln!("Press Ctrl+C to stop the server");

    tokio::select! {
        result = run(listener, state) => {
            result?;
        }
        _ = shutdown_signal() => {
            crate::log_event!("server", "shutting down");
        }
    }

    eprintln!("tabsync hub shut down");
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("[server] cannot listen for ctrl+c: {e}");
        std::future::pending::<()>().await;
    }
}
