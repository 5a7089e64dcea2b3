use crate::model::Ms;

/// Hard resource limits. Requests past these fail with `LimitExceeded`
/// rather than degrading the whole tenant.

pub const MAX_PROPERTIES_PER_TENANT: usize = 100_000;

pub const MAX_BOOKINGS_PER_PROPERTY: usize = 10_000;

pub const MAX_REASON_LEN: usize = 512;

pub const MAX_TENANTS: usize = 1024;

pub const MAX_TENANT_NAME_LEN: usize = 256;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 2100-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Two years — longer tenancies are renegotiated, not booked in one range.
pub const MAX_SPAN_DURATION_MS: Ms = 2 * 366 * 24 * 3_600_000;

/// Availability queries are bounded to roughly a year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
