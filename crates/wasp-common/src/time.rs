//! Wall-clock helpers. Timestamps travel as signed unix nanoseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Current unix time in nanoseconds.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Convert a unix nanosecond timestamp to whole seconds.
pub fn nanos_to_secs(ts: i64) -> i64 {
    ts / NANOS_PER_SEC
}

/// Absolute distance between two timestamps.
pub fn skew(a: i64, b: i64) -> Duration {
    Duration::from_nanos(a.abs_diff(b))
}
