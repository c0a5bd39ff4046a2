// ============================================================================
// Worker health endpoint
// ============================================================================

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use chirp_pipeline::PhaseCell;

#[derive(Clone)]
pub struct HealthState {
    pub pool: PgPool,
    pub phase: PhaseCell,
}

/// Serve GET /health until the process exits
pub async fn serve(state: HealthState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port = port, "Health endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// 200 while the worker is listening or processing and the database answers,
/// 503 otherwise
async fn health_check(
    State(state): State<HealthState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let phase = state.phase.get();
    let db_ok = chirp_db::ping(&state.pool).await;

    let status = if phase.is_healthy() && db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "phase": format!("{phase:?}"),
            "database": if db_ok { "up" } else { "down" },
        })),
    )
}
