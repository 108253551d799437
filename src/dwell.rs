//! Dwell-time gate.
//!
//! Electrochromic glass needs a settling interval between accepted level
//! changes; commanding a panel again before it has settled stresses the
//! device. The gate is a pure boundary condition, not a fallible operation:
//! it answers "may this panel change now?" and nothing else. The minimum
//! dwell interval is process-wide configuration
//! ([`ServiceConfig::min_dwell_secs`](crate::config::ServiceConfig)).

/// Whether a panel may accept a new level change at `now`.
///
/// * `last_change_ts` - epoch seconds of the last accepted change,
///   `0` meaning the panel has never changed.
/// * `now` - current epoch seconds.
/// * `min_dwell_secs` - minimum required interval between accepted changes.
///
/// A never-changed panel is always allowed. A clock regression
/// (`now < last_change_ts`) saturates to zero elapsed time and is treated
/// as "too soon" rather than panicking or wrapping.
pub fn can_change(last_change_ts: u64, now: u64, min_dwell_secs: u64) -> bool {
    last_change_ts == 0 || now.saturating_sub(last_change_ts) >= min_dwell_secs
}
