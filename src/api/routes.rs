use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(crate::api::handlers::health))
        .route(
            "/research/dispatch",
            post(crate::api::handlers::research::dispatch),
        )
        .route(
            "/research/synthesize",
            post(crate::api::handlers::research::synthesize),
        )
        .route(
            "/research/runs/{run_id}",
            get(crate::api::handlers::research::run_status),
        )
        .route(
            "/catalog/refresh",
            post(crate::api::handlers::catalog::refresh),
        )
        .route(
            "/catalog/update",
            post(crate::api::handlers::catalog::update),
        )
        .route(
            "/config/reload",
            post(crate::api::handlers::reload_config),
        )
}
