use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;

use super::conflict::{find_conflict, validate_span};
use super::{Engine, EngineError, SharedVehicleState};

impl Engine {
    /// Clone the vehicle handles out of the map so no shard lock is held across an await.
    fn vehicle_handles(&self, only: Option<Ulid>) -> Vec<SharedVehicleState> {
        match only {
            Some(id) => self.get_vehicle_state(&id).into_iter().collect(),
            None => self.vehicles.iter().map(|e| e.value().clone()).collect(),
        }
    }

    /// Newest first.
    pub async fn list_vehicles(&self) -> Vec<VehicleInfo> {
        let mut out = Vec::with_capacity(self.vehicles.len());
        for vs in self.vehicle_handles(None) {
            out.push(vs.read().await.info());
        }
        out.sort_by_key(|v| Reverse(v.id));
        out
    }

    pub async fn get_vehicle(&self, id: Ulid) -> Option<VehicleInfo> {
        let vs = self.get_vehicle_state(&id)?;
        let guard = vs.read().await;
        Some(guard.info())
    }

    /// Email ascending. Password hashes are not part of `UserInfo`.
    pub async fn list_users(&self) -> Vec<UserInfo> {
        let users = self.users.read().await;
        let mut out: Vec<UserInfo> = users.by_id.values().map(UserRecord::info).collect();
        out.sort_by(|a, b| a.email.cmp(&b.email));
        out
    }

    /// Case-insensitive; the record includes the password hash.
    pub async fn find_user_by_email(&self, email: &str) -> Option<UserRecord> {
        self.users.read().await.find_by_email(email).cloned()
    }

    pub async fn get_user(&self, id: Ulid) -> Option<UserRecord> {
        self.users.read().await.by_id.get(&id).cloned()
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<ReservationInfo> {
        let vehicle_id = self.vehicle_for_reservation(&id)?;
        let vs = self.get_vehicle_state(&vehicle_id)?;
        let guard = vs.read().await;
        guard.reservation(id).map(|r| guard.reservation_info(r))
    }

    /// Newest first, optionally narrowed to one user and/or vehicle.
    pub async fn list_reservations(&self, filter: ReservationFilter) -> Vec<ReservationInfo> {
        let mut out = Vec::new();
        for vs in self.vehicle_handles(filter.vehicle_id) {
            let guard = vs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| filter.matches(guard.id, r.user_id))
                    .map(|r| guard.reservation_info(r)),
            );
        }
        out.sort_by_key(|r| Reverse(r.id));
        out
    }

    /// `list_reservations` joined with vehicle and user fields.
    pub async fn list_reservation_details(&self, filter: ReservationFilter) -> Vec<ReservationDetails> {
        let users = self.users.read().await;
        let email_of = |id: &Ulid| users.by_id.get(id).map(|u| u.email.clone());

        let mut out = Vec::new();
        for vs in self.vehicle_handles(filter.vehicle_id) {
            let guard = vs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| filter.matches(guard.id, r.user_id))
                    .map(|r| guard.reservation_details(r, email_of(&r.user_id))),
            );
        }
        out.sort_by_key(|d| Reverse(d.id));
        out
    }

    /// Whether an approved reservation other than `exclude` overlaps `[start, end)`.
    /// An unknown vehicle has nothing to conflict with.
    pub async fn has_conflict(
        &self,
        vehicle_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_span(start, end)?;
        let Some(vs) = self.get_vehicle_state(&vehicle_id) else {
            return Ok(false);
        };
        let guard = vs.read().await;
        Ok(find_conflict(&guard, &span, exclude).is_some())
    }
}
