use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

pub const MAX_VEHICLES: usize = 10_000;
pub const MAX_USERS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_VEHICLE: usize = 10_000;

/// Make and model.
pub const MAX_TEXT_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 254;
/// bcrypt only looks at the first 72 bytes.
pub const MAX_PASSWORD_LEN: usize = 72;

/// Exclusive bounds.
pub const MIN_VEHICLE_YEAR: i32 = 1900;
pub const MAX_VEHICLE_YEAR: i32 = 2100;

/// 1970-01-01 .. 2100-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
pub const MAX_RESERVATION_MS: Ms = 2 * 365 * DAY_MS;

pub const MAX_BODY_BYTES: usize = 64 * 1024;
