use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError, WalCommand, apply_to_vehicle, normalize_email};

fn clean_text(value: &str, missing: &'static str) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Invalid(missing));
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(value.to_string())
}

fn check_year(year: Option<i32>) -> Result<(), EngineError> {
    match year {
        Some(y) if y <= MIN_VEHICLE_YEAR || y >= MAX_VEHICLE_YEAR => {
            Err(EngineError::Invalid("year must be between 1900 and 2100"))
        }
        _ => Ok(()),
    }
}

/// `local@domain.tld`: no whitespace, exactly one `@`, and a dot inside the domain.
pub(crate) fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

impl Engine {
    pub async fn add_vehicle(&self, id: Ulid, spec: VehicleSpec) -> Result<VehicleInfo, EngineError> {
        let make = clean_text(&spec.make, "make is required")?;
        let model = clean_text(&spec.model, "model is required")?;
        check_year(spec.year)?;

        let _gate = self.gate.read().await;
        if self.vehicles.len() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        if self.vehicles.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VehicleAdded {
            id,
            make: make.clone(),
            model: model.clone(),
            year: spec.year,
            available: spec.available,
        };
        self.wal_append(&event).await?;
        let vs = VehicleState::new(id, make, model, spec.year, spec.available);
        let info = vs.info();
        self.vehicles.insert(id, Arc::new(RwLock::new(vs)));
        tracing::info!(vehicle_id = %id, "vehicle added");
        Ok(info)
    }

    pub async fn update_vehicle(&self, id: Ulid, patch: VehiclePatch) -> Result<VehicleInfo, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.lock_vehicle(&id).await?;
        if patch.is_empty() {
            return Ok(guard.info());
        }

        let make = match &patch.make {
            Some(m) => clean_text(m, "make is required")?,
            None => guard.make.clone(),
        };
        let model = match &patch.model {
            Some(m) => clean_text(m, "model is required")?,
            None => guard.model.clone(),
        };
        let year = patch.year.or(guard.year);
        check_year(year)?;
        let available = patch.available.unwrap_or(guard.available);

        let event = Event::VehicleUpdated {
            id,
            make,
            model,
            year,
            available,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Removes the vehicle and every reservation on it.
    pub async fn delete_vehicle(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let guard = self.lock_vehicle(&id).await?;

        let event = Event::VehicleDeleted { id };
        self.wal_append(&event).await?;
        self.vehicles.remove(&id);
        for r in &guard.reservations {
            self.reservation_to_vehicle.remove(&r.id);
        }
        tracing::info!(vehicle_id = %id, reservations = guard.reservations.len(), "vehicle deleted");
        Ok(())
    }

    pub async fn create_user(
        &self,
        id: Ulid,
        email: &str,
        password_hash: Option<String>,
        role: Role,
    ) -> Result<UserInfo, EngineError> {
        let email = normalize_email(email);
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if !is_valid_email(&email) {
            return Err(EngineError::Invalid("invalid email"));
        }

        let _gate = self.gate.read().await;
        let mut users = self.users.write().await;
        if users.by_id.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if users.by_id.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if users.by_email.contains_key(&email) {
            return Err(EngineError::DuplicateEmail(email));
        }

        let event = Event::UserCreated {
            id,
            email: email.clone(),
            password_hash: password_hash.clone(),
            role,
        };
        self.wal_append(&event).await?;
        let user = UserRecord {
            id,
            email,
            password_hash,
            role,
        };
        let info = user.info();
        users.insert(user);
        tracing::info!(user_id = %id, role = role.as_str(), "user created");
        Ok(info)
    }

    /// Conflicts are checked against approved reservations whatever the new status.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        req: NewReservation,
    ) -> Result<ReservationInfo, EngineError> {
        let span = validate_span(req.start, req.end)?;

        let _gate = self.gate.read().await;
        if !self.users.read().await.by_id.contains_key(&req.user_id) {
            return Err(EngineError::NotFound(req.user_id));
        }
        if self.reservation_to_vehicle.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.lock_vehicle(&req.vehicle_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
        }
        check_no_conflict(&guard, &span, None)?;

        let event = Event::ReservationCreated {
            id,
            vehicle_id: req.vehicle_id,
            user_id: req.user_id,
            span,
            status: req.status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(
            crate::observability::RESERVATIONS_CREATED_TOTAL,
            "status" => req.status.as_str()
        )
        .increment(1);

        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        Ok(guard.reservation_info(r))
    }

    pub async fn set_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<ReservationInfo, EngineError> {
        let _gate = self.gate.read().await;
        let (vehicle_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let span = guard.reservation(id).ok_or(EngineError::NotFound(id))?.span;
        if status == ReservationStatus::Approved {
            check_no_conflict(&guard, &span, Some(id))?;
        }

        let event = Event::ReservationStatusChanged {
            id,
            vehicle_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        Ok(guard.reservation_info(r))
    }

    /// Partial edit. The merged record is validated as a whole and, when it
    /// ends up approved, checked for conflicts on its (possibly new) vehicle.
    pub async fn edit_reservation(
        &self,
        id: Ulid,
        edit: ReservationEdit,
    ) -> Result<ReservationInfo, EngineError> {
        let _gate = self.gate.read().await;
        if let Some(user_id) = edit.user_id
            && !self.users.read().await.by_id.contains_key(&user_id)
        {
            return Err(EngineError::NotFound(user_id));
        }

        // Retry if another edit moved the reservation while we waited for locks.
        for _ in 0..3 {
            let from_vehicle_id = self
                .vehicle_for_reservation(&id)
                .ok_or(EngineError::NotFound(id))?;
            let target = edit.vehicle_id.unwrap_or(from_vehicle_id);
            let edited = if target == from_vehicle_id {
                self.edit_in_place(id, from_vehicle_id, &edit).await?
            } else {
                self.edit_across(id, from_vehicle_id, target, &edit).await?
            };
            if let Some(info) = edited {
                return Ok(info);
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// `None` when the reservation is no longer on `vehicle_id` once locked.
    async fn edit_in_place(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        edit: &ReservationEdit,
    ) -> Result<Option<ReservationInfo>, EngineError> {
        let Ok(mut guard) = self.lock_vehicle(&vehicle_id).await else {
            return Ok(None);
        };
        let Some(current) = guard.reservation(id).cloned() else {
            return Ok(None);
        };
        let (span, status, user_id) = merge_edit(&current, edit)?;
        if status == ReservationStatus::Approved {
            check_no_conflict(&guard, &span, Some(id))?;
        }
        let event = Event::ReservationEdited {
            id,
            from_vehicle_id: vehicle_id,
            vehicle_id,
            user_id,
            span,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        Ok(Some(guard.reservation_info(r)))
    }

    /// Moves the reservation to `target`. Both vehicles are locked in id order
    /// to prevent deadlocks. `None` when it already left `from_vehicle_id`.
    async fn edit_across(
        &self,
        id: Ulid,
        from_vehicle_id: Ulid,
        target: Ulid,
        edit: &ReservationEdit,
    ) -> Result<Option<ReservationInfo>, EngineError> {
        let (first, second) = if from_vehicle_id < target {
            (from_vehicle_id, target)
        } else {
            (target, from_vehicle_id)
        };
        let first_guard = self.lock_vehicle(&first).await;
        let second_guard = self.lock_vehicle(&second).await;
        let (from_guard, to_guard) = if first == from_vehicle_id {
            (first_guard, second_guard)
        } else {
            (second_guard, first_guard)
        };
        let Ok(mut from_guard) = from_guard else {
            return Ok(None);
        };
        let mut to_guard = to_guard?;

        let Some(current) = from_guard.reservation(id).cloned() else {
            return Ok(None);
        };
        if to_guard.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
        }
        let (span, status, user_id) = merge_edit(&current, edit)?;
        if status == ReservationStatus::Approved {
            check_no_conflict(&to_guard, &span, Some(id))?;
        }

        let event = Event::ReservationEdited {
            id,
            from_vehicle_id,
            vehicle_id: target,
            user_id,
            span,
            status,
        };
        self.wal_append(&event).await?;
        apply_to_vehicle(&mut from_guard, &event, &self.reservation_to_vehicle);
        apply_to_vehicle(&mut to_guard, &event, &self.reservation_to_vehicle);
        tracing::debug!(reservation_id = %id, from = %from_vehicle_id, to = %target, "reservation moved");

        let r = to_guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        Ok(Some(to_guard.reservation_info(r)))
    }

    /// Returns the vehicle the reservation was on.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.gate.read().await;
        let (vehicle_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let event = Event::ReservationDeleted { id, vehicle_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(vehicle_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();

        {
            let users = self.users.read().await;
            let mut records: Vec<&UserRecord> = users.by_id.values().collect();
            records.sort_by_key(|u| u.id);
            events.extend(records.into_iter().map(|u| Event::UserCreated {
                id: u.id,
                email: u.email.clone(),
                password_hash: u.password_hash.clone(),
                role: u.role,
            }));
        }

        let mut vehicles: Vec<_> = self
            .vehicles
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        vehicles.sort_by_key(|(id, _)| *id);
        for (_, vs) in vehicles {
            let guard = vs.read().await;
            events.push(Event::VehicleAdded {
                id: guard.id,
                make: guard.make.clone(),
                model: guard.model.clone(),
                year: guard.year,
                available: guard.available,
            });
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                id: r.id,
                vehicle_id: guard.id,
                user_id: r.user_id,
                span: r.span,
                status: r.status,
            }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn merge_edit(
    current: &Reservation,
    edit: &ReservationEdit,
) -> Result<(Span, ReservationStatus, Ulid), EngineError> {
    let span = validate_span(
        edit.start.unwrap_or(current.span.start),
        edit.end.unwrap_or(current.span.end),
    )?;
    let status = edit.status.unwrap_or(current.status);
    let user_id = edit.user_id.unwrap_or(current.user_id);
    Ok((span, status, user_id))
}
