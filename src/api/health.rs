use axum::{extract::State, Json};
use serde::Serialize;

use super::ApiState;
use crate::controller::CycleHealth;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    controller: CycleHealth,
}

/// GET /health
///
/// Always 200 while the process serves requests; `status` is "degraded"
/// when the last cycle failed or none has run yet.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let controller = state.status.health().await;
    let status = if controller.last_cycle_ok { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status,
        timestamp: chrono::Utc::now(),
        controller,
    })
}
