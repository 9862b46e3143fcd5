use crate::{
    dto::generation_dto::{RegeneratePartPayload, SaveSetPayload, PART_COUNT},
    error::{Error, Result},
    models::generation_job::JobKind,
    services::set_store::{ArtifactKind, SetHandle},
    AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value as JsonValue};
use tokio_util::io::ReaderStream;
use validator::Validate;

async fn set_summary(state: &AppState, handle: &SetHandle) -> Result<JsonValue> {
    let files = state.sets.artifacts(handle).await?;
    Ok(json!({
        "name": handle.name,
        "label": handle.label(),
        "has_questions": files.iter().any(|f| f == "set.json"),
        "has_audio": files.iter().any(|f| f == "full_audio.wav"),
        "files": files,
    }))
}

pub async fn list_sets(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let mut sets = Vec::new();
    for handle in state.sets.list().await? {
        sets.push(set_summary(&state, &handle).await?);
    }
    Ok(Json(sets))
}

pub async fn get_set(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    let handle = state.sets.open(&name).await?;
    let mut summary = set_summary(&state, &handle).await?;
    // A set still being generated has no set.json yet; the summary alone is returned.
    if handle.has(ArtifactKind::Json).await {
        let set = state.sets.read_set(&handle).await?;
        summary["set"] = serde_json::to_value(set)?;
    }
    Ok(Json(summary))
}

/// Queues audio for a set unless it already has it.
pub async fn generate_audio(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let handle = state.sets.open(&name).await?;
    if handle.has(ArtifactKind::FullAudio).await {
        return Ok(Json(json!({ "status": "ready" })).into_response());
    }
    if !handle.has(ArtifactKind::Json).await {
        return Err(Error::NotFound(format!("{} has no question set yet", handle.name)));
    }

    let job_id = state
        .jobs
        .enqueue(JobKind::Audio, json!({}), Some(&handle.name))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response())
}

#[axum::debug_handler]
pub async fn regenerate_part(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<RegeneratePartPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let handle = state.sets.open(&name).await?;
    let set = state.sets.read_set(&handle).await?;
    if set.blocks_for_part(payload.part).next().is_none() {
        return Err(Error::BadRequest(format!(
            "{} has no blocks for Part {}",
            handle.name, payload.part
        )));
    }

    let job_id = state
        .jobs
        .enqueue(
            JobKind::RegeneratePart,
            serde_json::to_value(&payload)?,
            Some(&handle.name),
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

async fn stream_artifact(handle: &SetHandle, kind: ArtifactKind) -> Result<Response> {
    let path = handle.path(kind);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!(
                "{} has no {}",
                handle.name,
                kind.file_name()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    let disposition = format!(
        "attachment; filename=\"{}_{}\"",
        handle.name,
        kind.file_name()
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, kind.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

pub async fn get_part_audio(
    State(state): State<AppState>,
    Path((name, part)): Path<(String, u8)>,
) -> Result<Response> {
    if !(1..=PART_COUNT).contains(&part) {
        return Err(Error::BadRequest(format!("Part must be between 1 and {}", PART_COUNT)));
    }
    let handle = state.sets.open(&name).await?;
    stream_artifact(&handle, ArtifactKind::PartAudio(part)).await
}

pub async fn download_file(
    State(state): State<AppState>,
    Path((name, kind)): Path<(String, String)>,
) -> Result<Response> {
    let kind = ArtifactKind::from_download_kind(&kind)
        .ok_or_else(|| Error::BadRequest(format!("Unknown file type: {}", kind)))?;
    let handle = state.sets.open(&name).await?;
    stream_artifact(&handle, kind).await
}

/// Records the set in the user's history with links to its downloadable files.
#[axum::debug_handler]
pub async fn save_set(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<SaveSetPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let handle = state.sets.open(&name).await?;
    if !handle.has(ArtifactKind::Questions).await {
        return Err(Error::BadRequest(format!(
            "{} is still being generated",
            handle.name
        )));
    }

    let mut files = Map::new();
    for (kind, label) in [
        (ArtifactKind::Questions, "questions"),
        (ArtifactKind::Transcript, "transcript"),
        (ArtifactKind::Answers, "answers"),
        (ArtifactKind::FullAudio, "audio"),
    ] {
        if handle.has(kind).await {
            files.insert(
                label.to_string(),
                JsonValue::String(format!("/api/sets/{}/files/{}", handle.name, label)),
            );
        }
    }

    let record = state
        .history
        .record(&handle.name, &payload.email, JsonValue::Object(files))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}
