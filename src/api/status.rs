use axum::{extract::State, Json};

use super::{error::ApiError, ApiState};
use crate::domain::StatusSnapshot;

/// GET /api/v1/status - latest completed cycle
pub async fn get_status(State(state): State<ApiState>) -> Result<Json<StatusSnapshot>, ApiError> {
    state
        .status
        .snapshot()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::ServiceUnavailable("no completed control cycle yet".into()))
}
