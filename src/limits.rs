//! Hard caps applied at the engine boundary.

/// Longest stay a single request may expand to.
pub const MAX_STAY_DAYS: i64 = 366;

pub const MAX_NOTES_LEN: usize = 2048;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_TRF_ID_LEN: usize = 64;

pub const MAX_ROOMS: usize = 100_000;

pub const MAX_ALLOCATIONS_PER_ROOM: usize = 1_000_000;

/// Query/Filter year bounds; anything outside falls back to the current year.
pub const MIN_QUERY_YEAR: i32 = 1970;
pub const MAX_QUERY_YEAR: i32 = 9999;
