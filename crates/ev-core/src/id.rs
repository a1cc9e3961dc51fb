//! Identifier helpers.
//!
//! Events are keyed by ULIDs: 48 bits of millisecond timestamp followed by
//! 80 bits of entropy, so byte order equals chronological order. The `ulid`
//! crate supplies parsing, formatting, comparison, and the byte layout; this
//! module adds the two constructions the store needs: a process-wide
//! monotonic generator and zero-entropy floor ids used as exclusive lower
//! bounds when seeking.

use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use ulid::{Generator, Ulid};

static GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Generate a fresh id. Safe for concurrent callers; two calls within the
/// same millisecond return strictly increasing ids.
pub fn make() -> Ulid {
    let mut generator = GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
    // The generator only fails when the 80-bit entropy overflows within a
    // single millisecond; fall back to a random id rather than stall.
    generator.generate().unwrap_or_else(|_| Ulid::new())
}

/// Id carrying the given timestamp and zero entropy.
///
/// Sorts before every real id generated in the same millisecond, which makes
/// it the exclusive lower bound for `since` seeks.
pub fn from_time(t: DateTime<Utc>) -> Ulid {
    from_time_ms(u64::try_from(t.timestamp_millis()).unwrap_or(0))
}

/// Same as [`from_time`], from a raw millisecond timestamp.
pub fn from_time_ms(ms: u64) -> Ulid {
    Ulid::from_parts(ms, 0)
}

/// The millisecond timestamp embedded in an id.
pub fn timestamp(id: Ulid) -> DateTime<Utc> {
    // 48-bit millisecond timestamps are always within chrono's range.
    DateTime::from_timestamp_millis(id.timestamp_ms() as i64).unwrap_or(DateTime::UNIX_EPOCH)
}
