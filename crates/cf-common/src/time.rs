//! ---
//! cf_section: "01-core-functionality"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Shared primitives and utilities for the failover runtime."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

/// Whether `window` has fully elapsed between `since` and `now`.
///
/// A missing `since` counts as elapsed so that the very first event is never gated.
pub fn has_elapsed(since: Option<Instant>, window: Duration, now: Instant) -> bool {
    match since {
        Some(at) => now.saturating_duration_since(at) >= window,
        None => true,
    }
}

/// Convert an elapsed duration into fractional milliseconds.
pub fn duration_to_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}
