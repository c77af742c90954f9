//! Provides the host clock used for all expiry decisions.
//!
//! Expiry timestamps are absolute Unix seconds. Within tests, the clock is driven by
//! **mock_instant** so that TTLs can be verified without actually sleeping:
//!
//! ```ignore
//! MockClock::advance(Duration::from_secs(6));
//! ```
//!
//! The simulated clock starts at a fixed epoch so that every component of a test (cache, mock
//! stores, assertions) agrees on "now".
#[cfg(test)]
use mock_instant::thread_local::MockClock;

#[cfg(test)]
const SIMULATED_EPOCH: i64 = 1_700_000_000;

/// Returns the current time in Unix seconds.
#[cfg(not(test))]
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns the current (simulated) time in Unix seconds.
#[cfg(test)]
pub fn now() -> i64 {
    SIMULATED_EPOCH + MockClock::time().as_secs() as i64
}

/// Computes the absolute expiry for an entry written now which should live **ttl_seconds**.
///
/// A TTL of zero yields zero, which means "never expires".
pub fn expire_at_after(ttl_seconds: u64) -> i64 {
    if ttl_seconds == 0 {
        0
    } else {
        now().saturating_add(i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
    }
}

/// Determines if an entry with the given expiry is expired at **now**.
///
/// Entries with an expiry of zero never expire.
pub fn is_expired(expire_at: i64, now: i64) -> bool {
    expire_at != 0 && now > expire_at
}

/// Returns the remaining seconds until the given expiry, or zero if there is none left or if
/// the entry never expires.
pub fn remaining_ttl(expire_at: i64, now: i64) -> u64 {
    if expire_at == 0 || expire_at <= now {
        0
    } else {
        (expire_at - now) as u64
    }
}
