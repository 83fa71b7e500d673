use axum::Json;
use axum::extract::{Path, State};
use ulid::Ulid;

use crate::model::VehicleInfo;

use super::AppState;
use super::error::ApiError;

pub(super) async fn list_vehicles(State(state): State<AppState>) -> Json<Vec<VehicleInfo>> {
    Json(state.engine.list_vehicles().await)
}

pub(super) async fn get_car(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VehicleInfo>, ApiError> {
    let id = Ulid::from_string(&id).map_err(|_| ApiError::NotFound("Car not found"))?;
    state
        .engine
        .get_vehicle(id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound("Car not found"))
}
