use std::time::Duration;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use medic_core::types::DecisionRecord;

use super::join_error;
use crate::error::AppError;
use crate::state::AppState;

/// A controller is stale once its last cycle is this many intervals old.
const STALE_AFTER_INTERVALS: u32 = 3;

/// GET /api/health: liveness of the HealingLoop, judged from the audit trail.
pub async fn get_health(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let latest = tokio::task::spawn_blocking(move || store.latest_decision())
        .await
        .map_err(join_error)??;
    Ok(Json(health_body(
        latest.as_ref(),
        app.cycle_interval,
        Utc::now(),
    )))
}

pub(crate) fn health_body(
    latest: Option<&DecisionRecord>,
    interval: Duration,
    now: DateTime<Utc>,
) -> serde_json::Value {
    let Some(record) = latest else {
        return serde_json::json!({
            "status": "unknown",
            "last_cycle_id": null,
            "finished_at": null,
            "age_secs": null,
        });
    };
    let age_secs = (now - record.finished_at).num_seconds().max(0);
    let stale_after = interval.as_secs() * u64::from(STALE_AFTER_INTERVALS);
    let status = if age_secs as u64 > stale_after {
        "stale"
    } else {
        "alive"
    };
    serde_json::json!({
        "status": status,
        "last_cycle_id": record.cycle_id,
        "finished_at": record.finished_at,
        "age_secs": age_secs,
        "cancelled": record.cancelled,
    })
}
