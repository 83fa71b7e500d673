use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Invalid("from_ts must be before to_ts"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_RESERVATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(span)
}

/// First approved reservation on the vehicle overlapping `span`, ignoring `exclude`.
pub(crate) fn find_conflict(vs: &VehicleState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    vs.overlapping(span)
        .find(|r| r.status == ReservationStatus::Approved && Some(r.id) != exclude)
        .map(|r| r.id)
}

pub(crate) fn check_no_conflict(
    vs: &VehicleState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(vs, span, exclude) {
        Some(existing) => {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(existing))
        }
        None => Ok(()),
    }
}
