use axum::extract::{Path, Query, State};
use axum::Json;
use medic_core::partition::{PartitionDescriptor, PartitionEvent};
use serde::Deserialize;

use super::join_error;
use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_EVENT_LIMIT: usize = 100;

/// GET /api/partitions: every descriptor, grouped by table, ordered by range.
pub async fn list_partitions(
    State(app): State<AppState>,
) -> Result<Json<Vec<PartitionDescriptor>>, AppError> {
    let store = app.store.clone();
    let partitions = tokio::task::spawn_blocking(move || store.all_partitions())
        .await
        .map_err(join_error)??;
    Ok(Json(partitions))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /api/partitions/{table}/events: transition history, newest first.
pub async fn list_events(
    State(app): State<AppState>,
    Path(table): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Vec<PartitionEvent>>, AppError> {
    let limit = q.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let store = app.store.clone();
    let events = tokio::task::spawn_blocking(move || {
        store.partition_events(Some(table.as_str()), limit)
    })
    .await
    .map_err(join_error)??;
    Ok(Json(events))
}
