//! Planned maintenance endpoints

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use chrono::Utc;
use tracing::info;

use crate::api::{
    error::{ApiError, ApiResult},
    middleware::auth::Caller,
    state::ApiState,
    types::MaintenanceResponse,
};
use crate::maintenance::{PlannedMaintenance, PmId, PmRequest};

/// GET /api/v1/pm
pub async fn list_maintenance(State(state): State<ApiState>) -> Json<MaintenanceResponse> {
    Json(state.daemon.maintenance.list().into())
}

/// POST /api/v1/pm
///
/// Body: `start`, `end` (RFC 3339), `device_pattern`, optional `kind` and
/// `description`
pub async fn create_maintenance(
    State(state): State<ApiState>,
    Extension(Caller(user)): Extension<Caller>,
    request: Result<Json<PmRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PlannedMaintenance>)> {
    let Json(request) =
        request.map_err(|e| ApiError::InvalidRequest(format!("invalid maintenance: {e}")))?;

    let pm = state.daemon.add_maintenance(request, Some(user.as_str()), Utc::now())?;
    info!("{user} scheduled maintenance {}", pm.id);
    Ok((StatusCode::CREATED, Json(pm)))
}

/// DELETE /api/v1/pm/{id}
pub async fn cancel_maintenance(
    State(state): State<ApiState>,
    Extension(Caller(user)): Extension<Caller>,
    id: Result<Path<PmId>, PathRejection>,
) -> ApiResult<Json<PlannedMaintenance>> {
    let Path(id) =
        id.map_err(|e| ApiError::InvalidRequest(format!("invalid maintenance id: {e}")))?;

    let pm = state.daemon.cancel_maintenance(id, Utc::now())?;
    info!("{user} cancelled maintenance {id}");
    Ok(Json(pm))
}
