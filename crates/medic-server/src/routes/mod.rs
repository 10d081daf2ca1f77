pub mod decisions;
pub mod health;
pub mod partitions;

use crate::error::AppError;

/// Map a `spawn_blocking` join failure into an HTTP 500.
pub(crate) fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError(anyhow::anyhow!("task join error: {e}"))
}
