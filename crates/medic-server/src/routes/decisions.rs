use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use medic_core::types::DecisionRecord;
use serde::Deserialize;
use uuid::Uuid;

use super::join_error;
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    /// RFC 3339; only cycles started at or after this instant.
    pub since: Option<String>,
}

/// GET /api/decisions: newest first.
pub async fn list_decisions(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<DecisionRecord>>, AppError> {
    let since = q.since.as_deref().map(parse_since).transpose()?;
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let store = app.store.clone();
    let records = tokio::task::spawn_blocking(move || store.decisions(since, limit))
        .await
        .map_err(join_error)??;
    Ok(Json(records))
}

/// GET /api/decisions/{cycle_id}
pub async fn get_decision(
    State(app): State<AppState>,
    Path(cycle_id): Path<String>,
) -> Result<Json<DecisionRecord>, AppError> {
    let id = Uuid::parse_str(&cycle_id)
        .map_err(|_| AppError::bad_request(format!("cycle id '{cycle_id}' is not a uuid")))?;
    let store = app.store.clone();
    let record = tokio::task::spawn_blocking(move || store.decision(id))
        .await
        .map_err(join_error)??;
    Ok(Json(record))
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::bad_request(format!("since '{raw}': {e}")))
}
