//! Read-only HTTP surface over the medic audit store.

pub mod error;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::Router;
use medic_core::shutdown::Shutdown;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and by the integration tests.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::get_health))
        // Decisions
        .route("/api/decisions", get(routes::decisions::list_decisions))
        .route(
            "/api/decisions/{cycle_id}",
            get(routes::decisions::get_decision),
        )
        // Partitions
        .route("/api/partitions", get(routes::partitions::list_partitions))
        .route(
            "/api/partitions/{table}/events",
            get(routes::partitions::list_events),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve until `shutdown` fires. The listener is bound by the caller so a
/// bind failure surfaces before any loop starts.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    app_state: AppState,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("medic HTTP surface listening on http://{addr}");
    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}
