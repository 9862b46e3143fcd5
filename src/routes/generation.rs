use crate::{
    dto::generation_dto::GenerateSetPayload,
    error::Result,
    models::generation_job::JobKind,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

/// Themes, topics and question types for the generator form.
pub async fn get_config(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.catalog.as_ref().clone()))
}

#[axum::debug_handler]
pub async fn generate_set(
    State(state): State<AppState>,
    Json(payload): Json<GenerateSetPayload>,
) -> Result<impl IntoResponse> {
    let requests = state.generator.validate_payload(&payload)?;

    let handle = state.sets.allocate().await?;
    let job_id = state
        .jobs
        .enqueue(
            JobKind::QuestionSet,
            serde_json::to_value(&payload)?,
            Some(&handle.name),
        )
        .await?;
    tracing::info!(
        set = %handle.name,
        blocks = requests.len(),
        audio = payload.generate_with_audio,
        "Question set generation queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "set_name": handle.name,
        })),
    ))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let job = state.jobs.get(id).await?;
    Ok(Json(job))
}
