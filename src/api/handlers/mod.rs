//! API request handlers.

/// Model metadata catalog handlers.
pub mod catalog;
/// Research pipeline handlers (dispatch, synthesize, run status).
pub mod research;

use crate::types::Result;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// Health check
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy")
    ),
    tag = "health"
)]
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "atlas-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Reload the TOML configuration from disk. In-flight runs keep the snapshot
/// they started with
#[utoipa::path(
    post,
    path = "/api/config/reload",
    responses(
        (status = 200, description = "Configuration reloaded"),
        (status = 500, description = "Reload failed; previous configuration stays active")
    ),
    tag = "config"
)]
pub async fn reload_config(State(state): State<AppState>) -> Result<Json<Value>> {
    state.config_manager.reload()?;
    let config = state.config_manager.config();
    Ok(Json(json!({
        "reloaded": true,
        "config_version": config.version
    })))
}
