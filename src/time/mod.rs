//! Clock handling and think-time budgeting.
//!
//! `clock` normalizes the loosely typed remaining-time values arriving off
//! the wire into canonical seconds; `allocator` turns a clock reading and a
//! coarse description of the position into a bounded budget for one move.

pub mod allocator;
pub mod clock;

pub use allocator::{AllocatorConfig, EvalOutlook, PositionPhase, TimeAllocator};
pub use clock::{to_seconds, ClockReading, RawClock};
