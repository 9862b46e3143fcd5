use crate::{dto::generation_dto::HistoryQuery, error::Result, AppState};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};

pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse> {
    let records = state.history.list(query.email.as_deref()).await?;
    Ok(Json(records))
}
