//! Think-time budgeting.
//!
//! One call per move decision: convert the clock reading and a coarse
//! description of the position into a bounded search budget. Pure and fast;
//! nothing here blocks or suspends.

use std::time::Duration;

use serde::Deserialize;

use crate::time::clock::ClockReading;

/// Coarse position descriptors used to modulate the budget.
///
/// Derived per decision from the current position, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionPhase {
    /// Number of legal moves in the position.
    pub legal_moves: usize,
    /// Total pieces on the board, both sides.
    pub piece_count: u32,
    /// Full-move number.
    pub move_number: u32,
}

/// Recent-evaluation outlook, from the session's adjudication window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutlook {
    /// Clearly ahead; spend less, the position plays itself.
    Winning,
    /// Balanced.
    Level,
    /// Behind; spend more looking for resources.
    Losing,
}

/// Allocator tunables. Defaults are sane for bullet through rapid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Below this many seconds remaining, the panic tier applies.
    pub panic_threshold_secs: f64,
    /// Subtracted from the remaining time in the panic tier.
    pub panic_margin_secs: f64,
    /// Absolute floor for any budget.
    pub min_think_secs: f64,
    /// Weight applied to the increment in the base budget.
    pub increment_weight: f64,
    /// Hard cap as a fraction of remaining time.
    pub max_fraction: f64,
    /// Headroom for network and submission latency.
    pub latency_buffer_secs: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            panic_threshold_secs: 2.0,
            panic_margin_secs: 0.25,
            min_think_secs: 0.02,
            increment_weight: 0.75,
            max_fraction: 0.2,
            latency_buffer_secs: 0.15,
        }
    }
}

/// Legal-move count of a typical middlegame position; the mobility factor
/// is neutral there.
const TYPICAL_MOBILITY: f64 = 30.0;
/// At or below this many pieces the position counts as a simplified endgame.
const ENDGAME_PIECES: u32 = 10;
/// Budget reduction in simplified endgames.
const ENDGAME_FACTOR: f64 = 0.8;
/// Budget scaling when the evaluation outlook is bad or good.
const LOSING_FACTOR: f64 = 1.3;
const WINNING_FACTOR: f64 = 0.7;

/// Computes the think-time budget for one move.
#[derive(Debug, Clone)]
pub struct TimeAllocator {
    config: AllocatorConfig,
}

impl TimeAllocator {
    /// Create an allocator with the given tunables.
    pub fn new(config: AllocatorConfig) -> Self {
        Self { config }
    }

    /// Budget one move.
    ///
    /// The result is non-negative, strictly below the remaining time outside
    /// the panic tier, and never above `max_fraction` of it. With the clock
    /// at zero it is the configured minimum.
    pub fn allocate(
        &self,
        clock: &ClockReading,
        phase: &PositionPhase,
        outlook: Option<EvalOutlook>,
    ) -> Duration {
        Duration::from_secs_f64(self.allocate_secs(clock, phase, outlook))
    }

    fn allocate_secs(
        &self,
        clock: &ClockReading,
        phase: &PositionPhase,
        outlook: Option<EvalOutlook>,
    ) -> f64 {
        let c = &self.config;
        let remaining = clock.remaining_secs();

        // Tier 1: the flag is falling. Answering at all beats answering well.
        if remaining <= 0.0 {
            return c.min_think_secs;
        }
        if remaining < c.panic_threshold_secs {
            return (remaining - c.panic_margin_secs)
                .max(c.min_think_secs)
                .min(remaining);
        }

        // Tiers 2 and 3: spread the clock over the expected rest of the game.
        let mtg = moves_to_go(remaining, phase.move_number);
        let mut budget = remaining / mtg + clock.increment_secs() * c.increment_weight;

        // Tier 4: position complexity.
        budget *= mobility_factor(phase.legal_moves);
        if phase.piece_count <= ENDGAME_PIECES {
            budget *= ENDGAME_FACTOR;
        }
        budget *= match outlook {
            Some(EvalOutlook::Losing) => LOSING_FACTOR,
            Some(EvalOutlook::Winning) => WINNING_FACTOR,
            Some(EvalOutlook::Level) | None => 1.0,
        };

        // Tier 5: clamps. No single move may drain the clock, and the
        // submission round-trip needs headroom.
        budget = budget
            .min(remaining * c.max_fraction)
            .max(c.min_think_secs);
        (budget - c.latency_buffer_secs).max(c.min_think_secs)
    }
}

/// Moves-to-go estimate from coarse remaining-time buckets, shrinking as the
/// game gets longer.
fn moves_to_go(remaining: f64, move_number: u32) -> f64 {
    let base = if remaining > 600.0 {
        45.0
    } else if remaining > 180.0 {
        35.0
    } else {
        25.0
    };
    (base - f64::from(move_number) * 0.25).max(10.0)
}

/// Scale by tactical richness: many replies want more time, one or two
/// forced replies want far less.
fn mobility_factor(legal_moves: usize) -> f64 {
    (legal_moves.max(1) as f64 / TYPICAL_MOBILITY)
        .sqrt()
        .clamp(0.4, 1.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn allocator() -> TimeAllocator {
        TimeAllocator::new(AllocatorConfig::default())
    }

    fn clock(remaining: f64, increment: f64) -> ClockReading {
        ClockReading {
            remaining: Duration::from_secs_f64(remaining),
            increment: Duration::from_secs_f64(increment),
        }
    }

    fn middlegame() -> PositionPhase {
        PositionPhase {
            legal_moves: 30,
            piece_count: 28,
            move_number: 10,
        }
    }

    #[test]
    fn zero_clock_yields_fixed_minimum() {
        let budget = allocator().allocate_secs(&clock(0.0, 0.0), &middlegame(), None);
        assert_eq!(budget, AllocatorConfig::default().min_think_secs);
    }

    #[test]
    fn panic_tier_stays_under_the_clock() {
        // 1.2s remaining must leave real submission headroom.
        let budget = allocator().allocate_secs(&clock(1.2, 0.0), &middlegame(), None);
        assert!(budget <= 1.0, "got {budget}");
        assert!(budget > 0.0);
    }

    #[test]
    fn panic_tier_is_monotone_in_remaining() {
        let alloc = allocator();
        let mut last = 0.0;
        for step in 1..200 {
            let remaining = f64::from(step) * 0.01;
            let budget = alloc.allocate_secs(&clock(remaining, 0.0), &middlegame(), None);
            assert!(budget >= last, "budget shrank at remaining={remaining}");
            assert!(budget <= remaining + 1e-12);
            last = budget;
        }
    }

    #[test]
    fn ninety_seconds_midgame_lands_in_single_digits() {
        let budget = allocator().allocate_secs(&clock(90.0, 0.0), &middlegame(), None);
        assert!((1.5..=4.5).contains(&budget), "got {budget}");
        assert!(budget <= 90.0 * 0.25);
    }

    #[test]
    fn forced_replies_get_less_time() {
        let alloc = allocator();
        let rich = alloc.allocate_secs(
            &clock(300.0, 2.0),
            &PositionPhase { legal_moves: 45, ..middlegame() },
            None,
        );
        let forced = alloc.allocate_secs(
            &clock(300.0, 2.0),
            &PositionPhase { legal_moves: 2, ..middlegame() },
            None,
        );
        assert!(forced < rich, "forced={forced} rich={rich}");
    }

    #[test]
    fn simplified_endgames_get_less_time() {
        let alloc = allocator();
        let full = alloc.allocate_secs(&clock(300.0, 0.0), &middlegame(), None);
        let bare = alloc.allocate_secs(
            &clock(300.0, 0.0),
            &PositionPhase { piece_count: 6, ..middlegame() },
            None,
        );
        assert!(bare < full);
    }

    #[test]
    fn outlook_scales_in_the_right_direction() {
        let alloc = allocator();
        let phase = middlegame();
        let level = alloc.allocate_secs(&clock(300.0, 0.0), &phase, Some(EvalOutlook::Level));
        let losing = alloc.allocate_secs(&clock(300.0, 0.0), &phase, Some(EvalOutlook::Losing));
        let winning = alloc.allocate_secs(&clock(300.0, 0.0), &phase, Some(EvalOutlook::Winning));
        assert!(losing > level);
        assert!(winning < level);
    }

    #[test]
    fn increment_raises_the_budget() {
        let alloc = allocator();
        let dry = alloc.allocate_secs(&clock(300.0, 0.0), &middlegame(), None);
        let fed = alloc.allocate_secs(&clock(300.0, 5.0), &middlegame(), None);
        assert!(fed > dry);
    }

    #[test]
    fn later_moves_shorten_the_horizon() {
        let alloc = allocator();
        let early = alloc.allocate_secs(
            &clock(120.0, 0.0),
            &PositionPhase { move_number: 5, ..middlegame() },
            None,
        );
        let late = alloc.allocate_secs(
            &clock(120.0, 0.0),
            &PositionPhase { move_number: 70, ..middlegame() },
            None,
        );
        assert!(late > early, "late moves spread over fewer expected moves");
    }

    proptest! {
        #[test]
        fn budget_is_bounded_everywhere(
            remaining in 0.0f64..36_000.0,
            increment in 0.0f64..60.0,
            legal_moves in 0usize..120,
            piece_count in 2u32..33,
            move_number in 1u32..300,
        ) {
            let cfg = AllocatorConfig::default();
            let phase = PositionPhase { legal_moves, piece_count, move_number };
            let budget = allocator().allocate_secs(&clock(remaining, increment), &phase, None);

            prop_assert!(budget >= 0.0);
            prop_assert!(budget.is_finite());
            if remaining >= cfg.panic_threshold_secs {
                prop_assert!(budget < remaining);
                prop_assert!(budget <= remaining * cfg.max_fraction + 1e-9);
            } else if remaining > 0.0 {
                prop_assert!(budget <= remaining + 1e-12);
            }
        }

        #[test]
        fn outlook_never_breaks_the_cap(
            remaining in 2.0f64..7_200.0,
            increment in 0.0f64..30.0,
        ) {
            let cfg = AllocatorConfig::default();
            for outlook in [EvalOutlook::Winning, EvalOutlook::Level, EvalOutlook::Losing] {
                let budget = allocator().allocate_secs(
                    &clock(remaining, increment),
                    &middlegame(),
                    Some(outlook),
                );
                prop_assert!(budget <= remaining * cfg.max_fraction + 1e-9);
            }
        }
    }
}
