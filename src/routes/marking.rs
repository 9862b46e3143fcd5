use crate::{
    error::{Error, Result},
    services::{
        export_service::ExportService,
        marking_service::{extract_text, official_key_text},
        set_store::ArtifactKind,
    },
    AppState,
};
use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

/// Marks uploaded answer sheets against a set (the newest finished one when `set_name` is omitted).
pub async fn mark_answers(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut set_name: Option<String> = None;
    let mut sheets = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "set_name" => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    set_name = Some(value.trim().to_string());
                }
            }
            "files" | "files[]" | "file" => {
                let filename = field.file_name().unwrap_or("answers.txt").to_string();
                let data = field.bytes().await?;
                if data.is_empty() {
                    continue;
                }
                sheets.push(extract_text(&filename, data.to_vec()).await?);
            }
            _ => {}
        }
    }

    if sheets.is_empty() {
        return Err(Error::BadRequest("Upload at least one answer sheet".to_string()));
    }

    let handle = match set_name {
        Some(name) => state.sets.open(&name).await?,
        None => state
            .sets
            .latest()
            .await?
            .ok_or_else(|| Error::NotFound("No question sets have been generated".to_string()))?,
    };
    let set = state.sets.read_set(&handle).await?;

    let results = state
        .marking
        .mark_batch(&official_key_text(&set), &sheets)
        .await?;

    let summary = ExportService::marking_summary_xlsx(&handle.label(), &results)?;
    state
        .sets
        .write_artifact(&handle, ArtifactKind::MarkingSummary, summary)
        .await?;

    Ok(Json(json!({
        "set_name": handle.name,
        "results": results,
        "summary": format!("/api/sets/{}/files/marking", handle.name),
    })))
}
