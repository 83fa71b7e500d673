use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{
    ReservationDetails, ReservationEdit, ReservationFilter, ReservationInfo, ReservationStatus, UserInfo,
    VehicleInfo, VehiclePatch, VehicleSpec,
};

use super::AppState;
use super::body::{
    bool_field, form_or_json_fields, has_any, id_field, json_fields, status_field, str_field, timestamp_field,
    year_field,
};
use super::error::ApiError;
use super::reservations::{create, reservation_request};

const EDIT_FIELDS: [&str; 4] = ["user_id", "vehicle_id", "from_ts", "to_ts"];

// ── Users & vehicles ─────────────────────────────────────

pub(super) async fn list_users(State(state): State<AppState>) -> Json<Vec<UserInfo>> {
    Json(state.engine.list_users().await)
}

pub(super) async fn list_vehicles(State(state): State<AppState>) -> Json<Vec<VehicleInfo>> {
    Json(state.engine.list_vehicles().await)
}

pub(super) async fn create_vehicle(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<VehicleInfo>), ApiError> {
    let fields = json_fields(&body);
    let (Some(make), Some(model)) = (str_field(&fields, "make")?, str_field(&fields, "model")?) else {
        return Err(ApiError::bad_request("make and model required"));
    };
    let spec = VehicleSpec {
        make: make.to_string(),
        model: model.to_string(),
        year: year_field(&fields, "year")?,
        available: bool_field(&fields, "available")?.unwrap_or(true),
    };
    let info = state.engine.add_vehicle(Ulid::new(), spec).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

fn car_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::NotFound("Car not found"))
}

pub(super) async fn update_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<VehicleInfo>, ApiError> {
    let id = car_id(&id)?;
    let fields = json_fields(&body);
    let patch = VehiclePatch {
        make: str_field(&fields, "make")?.map(str::to_string),
        model: str_field(&fields, "model")?.map(str::to_string),
        year: year_field(&fields, "year")?,
        available: bool_field(&fields, "available")?,
    };
    state
        .engine
        .update_vehicle(id, patch)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_engine(e, "Car not found"))
}

pub(super) async fn delete_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = car_id(&id)?;
    state
        .engine
        .delete_vehicle(id)
        .await
        .map_err(|e| ApiError::from_engine(e, "Car not found"))?;
    Ok(Json(serde_json::json!({ "id": id })))
}

// ── Rentals ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct RentalQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "vehicleId")]
    vehicle_id: Option<String>,
}

/// Parsed filter, or `None` when a filter value cannot match anything.
fn rental_filter(q: &RentalQuery) -> Option<ReservationFilter> {
    let parse = |raw: &Option<String>| -> Result<Option<Ulid>, ()> {
        match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(s) => Ulid::from_string(s).map(Some).map_err(|_| ()),
        }
    };
    Some(ReservationFilter {
        user_id: parse(&q.user_id).ok()?,
        vehicle_id: parse(&q.vehicle_id).ok()?,
    })
}

pub(super) async fn list_rentals(
    State(state): State<AppState>,
    Query(q): Query<RentalQuery>,
) -> Json<Vec<ReservationDetails>> {
    match rental_filter(&q) {
        Some(filter) => Json(state.engine.list_reservation_details(filter).await),
        None => Json(Vec::new()),
    }
}

/// Admin-created rentals are approved immediately.
pub(super) async fn create_rental(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<ReservationInfo>), ApiError> {
    let fields = json_fields(&body);
    let req = reservation_request(&fields, ReservationStatus::Approved, "Missing required fields")?;
    let info = create(&state, req).await?;
    tracing::info!(reservation_id = %info.id, vehicle_id = %info.vehicle_id, "rental created by admin");
    Ok((StatusCode::CREATED, Json(info)))
}

fn rental_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::bad_request("Invalid rental id"))
}

/// Edit when any of `user_id, vehicle_id, from_ts, to_ts` is present (a
/// `status` may ride along); a status change when only `status` is.
pub(super) async fn update_rental(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReservationInfo>, ApiError> {
    let id = rental_id(&id)?;
    let fields = form_or_json_fields(&headers, &body);
    let not_found = |e: EngineError| match e {
        EngineError::NotFound(missing) if missing != id => ApiError::NotFound("Vehicle or user not found"),
        other => ApiError::from_engine(other, "Reservation not found"),
    };

    if has_any(&fields, &EDIT_FIELDS) {
        let edit = ReservationEdit {
            vehicle_id: id_field(&fields, "vehicle_id")?,
            user_id: id_field(&fields, "user_id")?,
            start: timestamp_field(&fields, "from_ts")?,
            end: timestamp_field(&fields, "to_ts")?,
            status: status_field(&fields, "status")?,
        };
        let info = state.engine.edit_reservation(id, edit).await.map_err(not_found)?;
        tracing::info!(reservation_id = %id, status = info.status.as_str(), "rental edited");
        return Ok(Json(info));
    }

    let Some(status) = status_field(&fields, "status")? else {
        return Err(ApiError::bad_request("Status is required"));
    };
    let info = state
        .engine
        .set_reservation_status(id, status)
        .await
        .map_err(not_found)?;
    tracing::info!(reservation_id = %id, status = status.as_str(), "rental status changed");
    Ok(Json(info))
}

pub(super) async fn delete_rental(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = rental_id(&id)?;
    state
        .engine
        .delete_reservation(id)
        .await
        .map_err(|e| ApiError::from_engine(e, "Reservation not found"))?;
    Ok(Json(serde_json::json!({ "id": id })))
}
