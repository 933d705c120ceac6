//! Server state, router construction, and the serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use glowgrid_core::Theme;
use glowgrid_devices::DeviceDirector;

use crate::handlers;

/// Largest accepted request body. Field-change batches are tiny; anything
/// bigger is not a client of ours.
pub const MAX_REQUEST_BODY_SIZE: usize = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    /// The device fleet
    pub director: Arc<DeviceDirector>,
    /// UI theme from the config
    pub theme: Theme,
    /// Server start timestamp (unix seconds)
    pub started_at: i64,
}

impl ServerState {
    pub fn new(director: Arc<DeviceDirector>, theme: Theme) -> Self {
        Self {
            director,
            theme,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Create the application router.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_handler))
        .route("/api/forms", get(handlers::forms_handler))
        .route("/api/fields", post(handlers::set_fields_handler))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the server until shutdown, then disconnect the fleet.
///
/// Device connects happen in the background so an unreachable outlet never
/// delays the first page load. On SIGINT/SIGTERM the listener stops
/// accepting and every device gets one chance to close its connection
/// before the process exits.
pub async fn run(bind: SocketAddr, state: ServerState) -> anyhow::Result<()> {
    let director = Arc::clone(&state.director);
    tokio::spawn(async move {
        director.connect_all().await;
    });

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, devices = state.director.device_count(), "glowgrid listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, disconnecting devices");
    state.director.disconnect_all().await;
    info!("shutdown complete");
    Ok(())
}

/// Resolves when the process is asked to stop.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
