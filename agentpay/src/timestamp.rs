//! Unix timestamp helpers.
//!
//! Every persisted record (ledger entries, intents, circuit state, guard
//! usage) carries plain seconds-since-epoch values so that state written by
//! one process is readable by any other regardless of locale or timezone.

use std::time::SystemTime;

/// Returns the current time as seconds since the Unix epoch.
///
/// # Panics
///
/// Panics if the system clock is set before the Unix epoch, which should
/// never happen on properly configured systems.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime before UNIX epoch?!?")
        .as_secs()
}

/// Returns the current time as milliseconds since the Unix epoch.
///
/// # Panics
///
/// Panics if the system clock is set before the Unix epoch.
#[must_use]
pub fn now_unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime before UNIX epoch?!?")
        .as_millis()
}
