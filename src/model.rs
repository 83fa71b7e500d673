use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::timestamp::serialize_ms;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReservationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

/// A reservation as stored on its vehicle. The vehicle id is implied by the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    pub available: bool,
    /// All reservations regardless of status, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl VehicleState {
    pub fn new(id: Ulid, make: String, model: String, year: Option<i32>, available: bool) -> Self {
        Self {
            id,
            make,
            model,
            year,
            available,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn info(&self) -> VehicleInfo {
        VehicleInfo {
            id: self.id,
            make: self.make.clone(),
            model: self.model.clone(),
            year: self.year,
            available: self.available,
        }
    }

    pub fn reservation_info(&self, r: &Reservation) -> ReservationInfo {
        ReservationInfo {
            id: r.id,
            vehicle_id: self.id,
            user_id: r.user_id,
            from_ts: r.span.start,
            to_ts: r.span.end,
            status: r.status,
        }
    }

    pub fn reservation_details(&self, r: &Reservation, user_email: Option<String>) -> ReservationDetails {
        ReservationDetails {
            id: r.id,
            vehicle_id: self.id,
            user_id: r.user_id,
            from_ts: r.span.start,
            to_ts: r.span.end,
            status: r.status,
            vehicle_make: Some(self.make.clone()),
            vehicle_model: Some(self.model.clone()),
            vehicle_year: self.year,
            user_email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Ulid,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
}

impl UserRecord {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserCreated {
        id: Ulid,
        email: String,
        password_hash: Option<String>,
        role: Role,
    },
    VehicleAdded {
        id: Ulid,
        make: String,
        model: String,
        year: Option<i32>,
        available: bool,
    },
    VehicleUpdated {
        id: Ulid,
        make: String,
        model: String,
        year: Option<i32>,
        available: bool,
    },
    /// Drops the vehicle together with every reservation on it.
    VehicleDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        span: Span,
        status: ReservationStatus,
    },
    ReservationStatusChanged {
        id: Ulid,
        vehicle_id: Ulid,
        status: ReservationStatus,
    },
    ReservationEdited {
        id: Ulid,
        from_vehicle_id: Ulid,
        vehicle_id: Ulid,
        user_id: Ulid,
        span: Span,
        status: ReservationStatus,
    },
    ReservationDeleted {
        id: Ulid,
        vehicle_id: Ulid,
    },
}

// ── Mutation inputs ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VehicleSpec {
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    pub available: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VehiclePatch {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub available: Option<bool>,
}

impl VehiclePatch {
    pub fn is_empty(&self) -> bool {
        self.make.is_none() && self.model.is_none() && self.year.is_none() && self.available.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub vehicle_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: ReservationStatus,
}

/// Partial edit of a reservation. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ReservationEdit {
    pub vehicle_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReservationFilter {
    pub user_id: Option<Ulid>,
    pub vehicle_id: Option<Ulid>,
}

impl ReservationFilter {
    pub fn matches(&self, vehicle_id: Ulid, user_id: Ulid) -> bool {
        self.vehicle_id.is_none_or(|v| v == vehicle_id) && self.user_id.is_none_or(|u| u == user_id)
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleInfo {
    pub id: Ulid,
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: Ulid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub user_id: Ulid,
    #[serde(serialize_with = "serialize_ms")]
    pub from_ts: Ms,
    #[serde(serialize_with = "serialize_ms")]
    pub to_ts: Ms,
    pub status: ReservationStatus,
}

/// A reservation joined with its vehicle and user, for list screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationDetails {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub user_id: Ulid,
    #[serde(serialize_with = "serialize_ms")]
    pub from_ts: Ms,
    #[serde(serialize_with = "serialize_ms")]
    pub to_ts: Ms,
    pub status: ReservationStatus,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<i32>,
    pub user_email: Option<String>,
}
