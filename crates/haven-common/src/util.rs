//! Time and TTL helpers shared by the admission path.

use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum accepted message TTL: 10 seconds.
pub const MIN_TTL_MS: u64 = 10 * 1000;
/// Maximum accepted message TTL: 14 days.
pub const MAX_TTL_MS: u64 = 14 * 24 * 60 * 60 * 1000;
/// How far into the future a submission timestamp may lie.
const TIMESTAMP_SKEW_MS: u64 = 10 * 1000;

/// Returns the current time in milliseconds since the Unix epoch.
#[must_use]
pub fn get_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Returns `true` if `ttl_ms` is within the accepted bounds.
#[must_use]
pub fn validate_ttl(ttl_ms: u64) -> bool {
    (MIN_TTL_MS..=MAX_TTL_MS).contains(&ttl_ms)
}

/// Parses a decimal TTL string and validates its bounds.
///
/// Returns `None` on a non-numeric string or an out-of-range value.
#[must_use]
pub fn parse_ttl(ttl: &str) -> Option<u64> {
    ttl.parse::<u64>().ok().filter(|t| validate_ttl(*t))
}

/// Returns `true` if a submission timestamp is plausible: at most 10
/// seconds in the future and not already past its expiry.
#[must_use]
pub fn validate_timestamp(timestamp_ms: u64, ttl_ms: u64) -> bool {
    let now = get_time_ms();
    if timestamp_ms > now + TIMESTAMP_SKEW_MS {
        return false;
    }
    timestamp_ms.saturating_add(ttl_ms) >= now
}

/// Parses a decimal timestamp string and validates it against `ttl_ms`.
#[must_use]
pub fn parse_timestamp(timestamp: &str, ttl_ms: u64) -> Option<u64> {
    timestamp
        .parse::<u64>()
        .ok()
        .filter(|t| validate_timestamp(*t, ttl_ms))
}
