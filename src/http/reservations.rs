use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{NewReservation, ReservationDetails, ReservationFilter, ReservationInfo, ReservationStatus};

use super::AppState;
use super::body::{Fields, id_field, is_blank, json_fields, timestamp_field};
use super::error::ApiError;

const REQUIRED: [&str; 4] = ["vehicle_id", "user_id", "from_ts", "to_ts"];

/// Read `vehicle_id, user_id, from_ts, to_ts`; any blank one fails with `missing`.
pub(super) fn reservation_request(
    fields: &Fields,
    status: ReservationStatus,
    missing: &'static str,
) -> Result<NewReservation, ApiError> {
    if REQUIRED.iter().any(|k| is_blank(fields, k)) {
        return Err(ApiError::bad_request(missing));
    }
    Ok(NewReservation {
        vehicle_id: required(id_field(fields, "vehicle_id")?, missing)?,
        user_id: required(id_field(fields, "user_id")?, missing)?,
        start: required(timestamp_field(fields, "from_ts")?, missing)?,
        end: required(timestamp_field(fields, "to_ts")?, missing)?,
        status,
    })
}

fn required<T>(value: Option<T>, missing: &'static str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(missing))
}

/// Create and translate a missing vehicle or user into its own 404.
pub(super) async fn create(state: &AppState, req: NewReservation) -> Result<ReservationInfo, ApiError> {
    let (vehicle_id, user_id) = (req.vehicle_id, req.user_id);
    state
        .engine
        .create_reservation(Ulid::new(), req)
        .await
        .map_err(|e| match e {
            EngineError::NotFound(id) if id == vehicle_id => ApiError::NotFound("Vehicle not found"),
            EngineError::NotFound(id) if id == user_id => ApiError::NotFound("User not found"),
            other => other.into(),
        })
}

pub(super) async fn list_reservations(State(state): State<AppState>) -> Json<Vec<ReservationInfo>> {
    Json(state.engine.list_reservations(ReservationFilter::default()).await)
}

/// User-initiated, so always `pending`.
pub(super) async fn create_reservation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<ReservationInfo>), ApiError> {
    let fields = json_fields(&body);
    let req = reservation_request(
        &fields,
        ReservationStatus::Pending,
        "vehicle_id, user_id, from_ts and to_ts required",
    )?;
    let info = create(&state, req).await?;
    tracing::info!(reservation_id = %info.id, vehicle_id = %info.vehicle_id, "reservation requested");
    Ok((StatusCode::CREATED, Json(info)))
}

#[derive(Debug, Deserialize)]
pub(super) struct IdQuery {
    id: Option<String>,
}

pub(super) async fn delete_reservation(
    State(state): State<AppState>,
    Query(q): Query<IdQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(raw) = q.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(ApiError::bad_request("id required"));
    };
    let id = Ulid::from_string(raw).map_err(|_| ApiError::bad_request("invalid id"))?;
    state
        .engine
        .delete_reservation(id)
        .await
        .map_err(|e| ApiError::from_engine(e, "Reservation not found"))?;
    Ok(Json(serde_json::json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// An id that is not a ULID names no user, so its history is empty.
pub(super) async fn rental_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<ReservationDetails>>, ApiError> {
    let Some(raw) = q.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(ApiError::bad_request("User ID required"));
    };
    let Ok(user_id) = Ulid::from_string(raw) else {
        return Ok(Json(Vec::new()));
    };
    let filter = ReservationFilter {
        user_id: Some(user_id),
        vehicle_id: None,
    };
    Ok(Json(state.engine.list_reservation_details(filter).await))
}
