//! Event endpoints

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
};
use chrono::Utc;
use tracing::debug;

use crate::api::{
    error::{ApiError, ApiResult},
    middleware::auth::Caller,
    state::ApiState,
    types::{AckRequest, EventsResponse},
};
use crate::events::{Event, EventFilter, EventId};

fn event_id(id: Result<Path<EventId>, PathRejection>) -> ApiResult<EventId> {
    id.map(|Path(id)| id)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid event id: {e}")))
}

/// GET /api/v1/events
///
/// Query parameters: `device`, `kind`, `status`, `since`, `until` (RFC 3339)
pub async fn list_events(
    State(state): State<ApiState>,
    filter: Result<Query<EventFilter>, QueryRejection>,
) -> ApiResult<Json<EventsResponse>> {
    let Query(filter) =
        filter.map_err(|e| ApiError::InvalidRequest(format!("invalid query: {e}")))?;
    debug!("listing events matching {filter:?}");

    Ok(Json(state.daemon.events.get(&filter).into()))
}

/// GET /api/v1/events/{id}
pub async fn get_event(
    State(state): State<ApiState>,
    id: Result<Path<EventId>, PathRejection>,
) -> ApiResult<Json<Event>> {
    let id = event_id(id)?;
    Ok(Json(state.daemon.events.get_by_id(id)?))
}

/// Note carried by an ack body; an empty body means no note
fn ack_note(body: &[u8]) -> ApiResult<String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(String::new());
    }
    let request: AckRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid ack body: {e}")))?;
    Ok(request.note.unwrap_or_default())
}

/// POST /api/v1/events/{id}/ack
///
/// Body `{"note": "..."}` is optional; anything else is rejected
pub async fn ack_event(
    State(state): State<ApiState>,
    Extension(Caller(user)): Extension<Caller>,
    id: Result<Path<EventId>, PathRejection>,
    body: Bytes,
) -> ApiResult<Json<Event>> {
    let id = event_id(id)?;
    let note = ack_note(&body)?;

    let event = state.daemon.events.ack(id, &user, &note, Utc::now())?;
    Ok(Json(event))
}

/// POST /api/v1/events/{id}/clear
pub async fn clear_event(
    State(state): State<ApiState>,
    Extension(Caller(user)): Extension<Caller>,
    id: Result<Path<EventId>, PathRejection>,
) -> ApiResult<Json<Event>> {
    let id = event_id(id)?;
    let event = state.daemon.events.clear(id, &user, Utc::now())?;
    Ok(Json(event))
}
