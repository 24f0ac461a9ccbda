use crate::metadata::CatalogUpdater;
use crate::types::Result;
use crate::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Force a reload of the model metadata catalog from the store
#[utoipa::path(
    post,
    path = "/api/catalog/refresh",
    responses(
        (status = 200, description = "Catalog reloaded; reports whether store-backed data is in use")
    ),
    tag = "catalog"
)]
pub async fn refresh(State(state): State<AppState>) -> Json<Value> {
    let store_backed = state.catalog.refresh().await;
    state.catalog.log_status().await;
    let source = state.catalog.origin().await;
    let (data, _) = state.catalog.load().await;

    Json(json!({
        "refreshed": store_backed,
        "source": source,
        "models": data.data.len()
    }))
}

/// Fetch a fresh catalog document from the configured endpoint, store it, and
/// reload the in-memory copy
#[utoipa::path(
    post,
    path = "/api/catalog/update",
    responses(
        (status = 200, description = "Catalog document updated and reloaded"),
        (status = 500, description = "Fetch or validation failed; the previous document stays in place")
    ),
    tag = "catalog"
)]
pub async fn update(State(state): State<AppState>) -> Result<Json<Value>> {
    let config = state.config_manager.config();
    let updater = CatalogUpdater::new(state.store.clone(), config.metadata.catalog_url.clone());

    let models_updated = updater.update().await?;
    let store_backed = state.catalog.refresh().await;

    Ok(Json(json!({
        "status": "success",
        "models_updated": models_updated,
        "store_backed": store_backed
    })))
}
