//! Request handlers.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use glowgrid_devices::director::DirectorError;
use glowgrid_devices::form::DeviceForm;

use crate::server::ServerState;

/// Forms listing response.
#[derive(Debug, Clone, Serialize)]
pub struct FormsResponse {
    /// CSS theme class for the UI
    pub theme: String,
    /// Device forms in display order
    pub forms: Vec<DeviceForm>,
}

/// Basic health check handler (public endpoint).
pub async fn health_handler(State(state): State<ServerState>) -> Json<Value> {
    let uptime = (chrono::Utc::now().timestamp() - state.started_at).max(0);

    Json(json!({
        "status": "ok",
        "service": "glowgrid",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": uptime,
        "devices": state.director.device_count(),
        "connected": state.director.connected_count().await,
    }))
}

/// List every device form for rendering.
pub async fn forms_handler(State(state): State<ServerState>) -> Json<FormsResponse> {
    Json(FormsResponse {
        theme: state.theme.css_class().to_string(),
        forms: state.director.forms().await,
    })
}

/// Apply a batch of field-level state changes.
///
/// The body is a map from field UID to new state. Changes are applied one
/// at a time; the first failure stops the batch and its message is
/// returned, matching what the UI shows the user.
pub async fn set_fields_handler(
    State(state): State<ServerState>,
    Json(changes): Json<HashMap<String, Value>>,
) -> Response {
    for (field_uid, value) in changes {
        if let Err(error) = state.director.set_field_state(&field_uid, value).await {
            warn!(field = %field_uid, %error, "field state change rejected");
            let status = match &error {
                DirectorError::UnknownField(_) => StatusCode::BAD_REQUEST,
                DirectorError::Driver(_) => StatusCode::BAD_GATEWAY,
            };
            return (status, Json(json!({ "error": error.to_string() }))).into_response();
        }
    }

    StatusCode::OK.into_response()
}
