use crate::model::{DAY_MS, Ms};

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_PHONE_LEN: usize = 40;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Ceiling for a service price or a single payment, in currency units.
pub const MAX_MONEY_AMOUNT: i64 = 1_000_000_000;

/// How far ahead a client may request a booking.
pub const MAX_BOOKING_HORIZON_MS: Ms = 366 * DAY_MS;

/// A single service may not run longer than a day.
pub const MAX_SERVICE_DURATION_MINUTES: u32 = 1_440;

pub const MIN_SLOT_GRANULARITY_MINUTES: i64 = 5;
pub const MAX_SLOT_GRANULARITY_MINUTES: i64 = 1_440;
