mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                // Non-append commands see every append queued before them.
                if let Some(cmd) = pending {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, batch = batch.len(), "WAL flush failed");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes do not leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── User directory ───────────────────────────────────────

#[derive(Debug, Default)]
pub(super) struct UserDirectory {
    pub(super) by_id: HashMap<Ulid, UserRecord>,
    /// Lower-cased email → user id.
    pub(super) by_email: HashMap<String, Ulid>,
}

impl UserDirectory {
    fn insert(&mut self, user: UserRecord) {
        self.by_email.insert(user.email.clone(), user.id);
        self.by_id.insert(user.id, user);
    }

    pub(super) fn find_by_email(&self, email: &str) -> Option<&UserRecord> {
        self.by_email.get(&normalize_email(email)).and_then(|id| self.by_id.get(id))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(super) vehicles: DashMap<Ulid, SharedVehicleState>,
    /// Reverse lookup: reservation id → vehicle id.
    pub(super) reservation_to_vehicle: DashMap<Ulid, Ulid>,
    pub(super) users: RwLock<UserDirectory>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss a concurrent append.
    pub(super) gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an event to one vehicle (no locking, caller holds the lock).
/// A cross-vehicle edit is applied to the source and to the destination.
fn apply_to_vehicle(vs: &mut VehicleState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::VehicleUpdated {
            make,
            model,
            year,
            available,
            ..
        } => {
            vs.make = make.clone();
            vs.model = model.clone();
            vs.year = *year;
            vs.available = *available;
        }
        Event::ReservationCreated {
            id,
            vehicle_id,
            user_id,
            span,
            status,
        } => {
            vs.insert_reservation(Reservation {
                id: *id,
                user_id: *user_id,
                span: *span,
                status: *status,
            });
            index.insert(*id, *vehicle_id);
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = vs.reservation_mut(*id) {
                r.status = *status;
            }
        }
        Event::ReservationEdited {
            id,
            from_vehicle_id,
            vehicle_id,
            user_id,
            span,
            status,
        } => {
            if vs.id == *from_vehicle_id {
                vs.remove_reservation(*id);
            }
            if vs.id == *vehicle_id {
                vs.insert_reservation(Reservation {
                    id: *id,
                    user_id: *user_id,
                    span: *span,
                    status: *status,
                });
                index.insert(*id, *vehicle_id);
            }
        }
        Event::ReservationDeleted { id, .. } => {
            vs.remove_reservation(*id);
            index.remove(id);
        }
        // Handled at the map level, not here.
        Event::UserCreated { .. } | Event::VehicleAdded { .. } | Event::VehicleDeleted { .. } => {}
    }
}

/// Vehicles touched by an event that lives on vehicle state.
fn event_vehicle_ids(event: &Event) -> (Option<Ulid>, Option<Ulid>) {
    match event {
        Event::VehicleUpdated { id, .. } => (Some(*id), None),
        Event::ReservationCreated { vehicle_id, .. }
        | Event::ReservationStatusChanged { vehicle_id, .. }
        | Event::ReservationDeleted { vehicle_id, .. } => (Some(*vehicle_id), None),
        Event::ReservationEdited {
            from_vehicle_id,
            vehicle_id,
            ..
        } if from_vehicle_id != vehicle_id => (Some(*from_vehicle_id), Some(*vehicle_id)),
        Event::ReservationEdited { vehicle_id, .. } => (Some(*vehicle_id), None),
        Event::UserCreated { .. } | Event::VehicleAdded { .. } | Event::VehicleDeleted { .. } => {
            (None, None)
        }
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            vehicles: DashMap::new(),
            reservation_to_vehicle: DashMap::new(),
            users: RwLock::new(UserDirectory::default()),
            gate: RwLock::new(()),
            wal_tx,
        };
        engine.replay(&events)?;
        tracing::info!(
            events = events.len(),
            vehicles = engine.vehicles.len(),
            reservations = engine.reservation_to_vehicle.len(),
            "replayed WAL"
        );
        Ok(engine)
    }

    /// Nothing else holds these locks yet, so every `try_*` succeeds. Never
    /// use `blocking_*` here because this runs inside an async context.
    fn replay(&self, events: &[Event]) -> io::Result<()> {
        let contended = || io::Error::other("replay: lock contended");
        for event in events {
            match event {
                Event::UserCreated {
                    id,
                    email,
                    password_hash,
                    role,
                } => {
                    let mut users = self.users.try_write().map_err(|_| contended())?;
                    users.insert(UserRecord {
                        id: *id,
                        email: email.clone(),
                        password_hash: password_hash.clone(),
                        role: *role,
                    });
                }
                Event::VehicleAdded {
                    id,
                    make,
                    model,
                    year,
                    available,
                } => {
                    let vs = VehicleState::new(*id, make.clone(), model.clone(), *year, *available);
                    self.vehicles.insert(*id, Arc::new(RwLock::new(vs)));
                }
                Event::VehicleDeleted { id } => {
                    if let Some((_, vs)) = self.vehicles.remove(id) {
                        let guard = vs.try_read().map_err(|_| contended())?;
                        for r in &guard.reservations {
                            self.reservation_to_vehicle.remove(&r.id);
                        }
                    }
                }
                other => {
                    let (first, second) = event_vehicle_ids(other);
                    for vehicle_id in [first, second].into_iter().flatten() {
                        if let Some(vs) = self.get_vehicle_state(&vehicle_id) {
                            let mut guard = vs.try_write().map_err(|_| contended())?;
                            apply_to_vehicle(&mut guard, other, &self.reservation_to_vehicle);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_vehicle_state(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub(super) fn vehicle_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_to_vehicle.get(id).map(|e| *e.value())
    }

    /// WAL-append then apply, with the vehicle lock held by the caller.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_vehicle(vs, event, &self.reservation_to_vehicle);
        Ok(())
    }

    /// Write-lock a vehicle that is still in the catalog once the lock is held.
    pub(super) async fn lock_vehicle(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let vs = self.get_vehicle_state(id).ok_or(EngineError::NotFound(*id))?;
        let guard = vs.write_owned().await;
        if !self.vehicles.contains_key(id) {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    /// Lookup reservation → vehicle, then acquire that vehicle's write lock.
    /// Retries if an edit moved the reservation while we waited for the lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<VehicleState>), EngineError> {
        for _ in 0..3 {
            let vehicle_id = self
                .vehicle_for_reservation(reservation_id)
                .ok_or(EngineError::NotFound(*reservation_id))?;
            let guard = self.lock_vehicle(&vehicle_id).await?;
            if guard.reservation(*reservation_id).is_some() {
                return Ok((vehicle_id, guard));
            }
        }
        Err(EngineError::NotFound(*reservation_id))
    }
}
