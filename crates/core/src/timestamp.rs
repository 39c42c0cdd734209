//! Timestamp normalization.
//!
//! Both store backends keep microsecond precision, so every timestamp that
//! takes part in a comparison (`checked_at` watermarks, `valid_at`, keyset
//! cursors) is normalized to UTC and truncated to whole microseconds first.

use time::{OffsetDateTime, UtcOffset};

/// Convert to UTC and drop sub-microsecond precision.
pub fn normalize(ts: OffsetDateTime) -> OffsetDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    let nanos = utc.nanosecond();
    // nanosecond() is always < 1_000_000_000, so the truncated value is valid.
    utc.replace_nanosecond(nanos - nanos % 1_000).unwrap_or(utc)
}

/// Current time, normalized.
pub fn now() -> OffsetDateTime {
    normalize(OffsetDateTime::now_utc())
}
