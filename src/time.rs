//! Event-time primitives.
//!
//! Timestamps are milliseconds since the UNIX epoch. The representable range is bounded so
//! that `max_timestamp + allowed_lateness` style arithmetic never overflows.

/// Milliseconds since UNIX epoch (UTC).
pub type TimestampMs = i64;

/// A span of event time in milliseconds.
pub type DurationMs = i64;

/// The smallest representable event time. Watermarks start here.
pub const TIMESTAMP_MIN_VALUE: TimestampMs = i64::MIN / 1000;

/// The largest representable event time. A watermark at this value means "input complete".
pub const TIMESTAMP_MAX_VALUE: TimestampMs = i64::MAX / 1000;

pub const ONE_DAY_MS: DurationMs = 24 * 60 * 60 * 1000;

/// Floor division for i64 (unlike `/` which truncates toward zero).
#[inline]
pub(crate) fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r > 0) != (b > 0)) { q - 1 } else { q }
}

/// Non-negative remainder, so window starts line up for negative timestamps too.
#[inline]
pub(crate) fn mod_floor(a: i64, b: i64) -> i64 {
    a - div_floor(a, b) * b
}

/// `ts + delta`, clamped to the representable event-time range.
#[inline]
#[must_use]
pub fn saturating_add(ts: TimestampMs, delta: DurationMs) -> TimestampMs {
    ts.saturating_add(delta)
        .clamp(TIMESTAMP_MIN_VALUE, TIMESTAMP_MAX_VALUE)
}
