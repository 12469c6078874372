use crate::model::Ms;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_EVENTS: usize = 1_000_000;
pub const MAX_ALLOCATIONS_PER_RESOURCE: usize = 10_000;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_KIND_LEN: usize = 64;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One event may not run longer than a (leap) year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
