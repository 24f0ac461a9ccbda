use crate::{
    research::{CompletionTracker, Dispatcher, SynthesisCoordinator, SynthesisOutcome},
    store::paths::DatePartition,
    types::{
        AppError, Completion, CompletionStatus, DispatchRequest, DispatchSummary, Result,
        SynthesisRequest,
    },
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

/// Start a research run: decompose every selected project and fan the
/// sub-topics out to workers
#[utoipa::path(
    post,
    path = "/api/research/dispatch",
    request_body = DispatchRequest,
    responses(
        (status = 200, description = "Run dispatched", body = DispatchSummary),
        (status = 400, description = "Invalid input")
    ),
    tag = "research"
)]
pub async fn dispatch(
    State(state): State<AppState>,
    Json(payload): Json<DispatchRequest>,
) -> Result<Json<DispatchSummary>> {
    let config = state.config_manager.config();

    // A rejected project selection never touches the provider.
    crate::research::dispatcher::select_projects(&config, &payload)?;

    let provider = config
        .provider
        .provider(config.decomposition.model.as_deref())?;
    let llm = provider.create_client().await?;

    let dispatcher = Dispatcher::new(state.store.as_ref(), state.queue.as_ref(), llm.as_ref());
    let summary = dispatcher.dispatch(&config, &payload).await?;
    Ok(Json(summary))
}

/// Synthesize a run into a comprehensive report, or schedule a retry when the
/// run is still incomplete
#[utoipa::path(
    post,
    path = "/api/research/synthesize",
    request_body = SynthesisRequest,
    responses(
        (status = 200, description = "Report generated", body = crate::types::SynthesisCompleted),
        (status = 202, description = "Run incomplete, retry scheduled", body = crate::types::SynthesisInProgress),
        (status = 404, description = "No run found")
    ),
    tag = "research"
)]
pub async fn synthesize(
    State(state): State<AppState>,
    Json(payload): Json<SynthesisRequest>,
) -> Result<Response> {
    let config = state.config_manager.config();

    // Resolve the target run first; a date with no runs is a plain 404 and
    // never touches the provider.
    let date = payload
        .synthesis_date
        .map(DatePartition::from_date)
        .unwrap_or_else(DatePartition::today);
    let run_id = match payload.run_id {
        Some(run_id) => run_id,
        None => {
            let tracker = CompletionTracker::new(state.store.as_ref());
            tracker.most_recent_run(date).await?.ok_or_else(|| {
                AppError::NotFound(format!("No research runs found for date {date}"))
            })?
        }
    };
    let payload = SynthesisRequest {
        synthesis_date: Some(date.date()),
        run_id: Some(run_id),
        retry_count: payload.retry_count,
    };

    let provider = config.provider.provider(config.synthesis.model.as_deref())?;
    let llm: Arc<dyn crate::llm::LLMClient> = Arc::from(provider.create_client().await?);

    let coordinator =
        SynthesisCoordinator::new(state.store.clone(), llm, state.scheduler.clone());

    match coordinator.synthesize(&config.synthesis, payload).await? {
        SynthesisOutcome::Completed(done) => Ok((StatusCode::OK, Json(done)).into_response()),
        SynthesisOutcome::InProgress(progress) => {
            Ok((StatusCode::ACCEPTED, Json(progress)).into_response())
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RunStatusQuery {
    /// Date partition of the run; defaults to today (UTC).
    pub date: Option<NaiveDate>,
}

/// Completion status of a run
#[utoipa::path(
    get,
    path = "/api/research/runs/{run_id}",
    params(
        ("run_id" = String, Path, description = "Run identifier"),
        RunStatusQuery
    ),
    responses(
        (status = 200, description = "Completion status", body = CompletionStatus),
        (status = 404, description = "Run not found")
    ),
    tag = "research"
)]
pub async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<RunStatusQuery>,
) -> Result<Json<CompletionStatus>> {
    let config = state.config_manager.config();
    let date = query
        .date
        .map(DatePartition::from_date)
        .unwrap_or_else(DatePartition::today);

    let tracker = CompletionTracker::new(state.store.as_ref());
    let status = tracker
        .check(date, &run_id, config.synthesis.minimum_completion_rate)
        .await?;

    if status.status == Completion::NotFound {
        return Err(AppError::NotFound(format!(
            "No manifest found for run {run_id} on {date}"
        )));
    }
    Ok(Json(status))
}
