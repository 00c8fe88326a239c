use crate::model::Ms;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Seats per hour bucket, and the ceiling on a single schedule's applicants.
pub const MAX_APPLICANTS: u32 = 50_000;

/// Schedules and slot queries must start at least this many calendar days out.
pub const MIN_START_LEAD_DAYS: Ms = 3;
/// Widest slot listing window.
pub const MAX_SLOT_QUERY_DAYS: Ms = 14;
/// Widest schedule range. Bounds the number of buckets a single transaction locks.
pub const MAX_SCHEDULE_SPAN_MS: Ms = 31 * DAY_MS;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_NICKNAME_LEN: usize = 100;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Longest accepted wire line in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
