//! Canonical clock conversion.
//!
//! The hosting service reports remaining time and increments in a loosely
//! typed form: either an explicit `{"millis": N}` object or a bare number
//! whose unit is not tagged. Everything inward of this module works in
//! canonical seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bare values above this are read as milliseconds.
///
/// Last-resort fallback only: a bare `1500` meaning "1500 seconds" would be
/// misread as 1.5 seconds. The boundary is expected to send the tagged
/// form; the heuristic exists for feeds that predate it.
const UNIT_HEURISTIC_THRESHOLD: f64 = 1000.0;

/// A remaining-time or increment value as it arrives off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawClock {
    /// Explicitly tagged milliseconds. Authoritative.
    Tagged {
        /// Milliseconds on the clock.
        millis: u64,
    },
    /// Bare number of unknown unit, disambiguated by [`to_seconds`].
    Bare(f64),
}

/// Convert a raw clock value into canonical seconds.
///
/// Absent values read as zero. Bare numbers above 1000 are treated as
/// milliseconds, otherwise as seconds already; negatives clamp to zero.
pub fn to_seconds(raw: Option<RawClock>) -> f64 {
    match raw {
        None => 0.0,
        Some(RawClock::Tagged { millis }) => millis as f64 / 1000.0,
        Some(RawClock::Bare(value)) if value > UNIT_HEURISTIC_THRESHOLD => value / 1000.0,
        Some(RawClock::Bare(value)) => value.max(0.0),
    }
}

/// The time budget input for one move decision.
///
/// Both fields are non-negative by construction. `remaining` may be zero:
/// the flag is about to fall and the allocator must still return a bounded
/// budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockReading {
    /// Time left on our clock.
    pub remaining: Duration,
    /// Increment added after each of our moves.
    pub increment: Duration,
}

impl ClockReading {
    /// Build a reading from wire values.
    pub fn from_raw(remaining: Option<RawClock>, increment: Option<RawClock>) -> Self {
        Self {
            remaining: Duration::from_secs_f64(to_seconds(remaining)),
            increment: Duration::from_secs_f64(to_seconds(increment)),
        }
    }

    /// Remaining time in seconds.
    pub fn remaining_secs(&self) -> f64 {
        self.remaining.as_secs_f64()
    }

    /// Increment in seconds.
    pub fn increment_secs(&self) -> f64 {
        self.increment.as_secs_f64()
    }
}
