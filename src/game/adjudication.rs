//! Evaluation-window adjudication.
//!
//! Each session keeps a rolling window of its recent search evaluations.
//! The window drives two side-channel requests — resignation on a sustained
//! lost evaluation, a draw offer on a sustained level one with little
//! material left — and the allocator's outlook.

use std::collections::VecDeque;

use serde::Deserialize;

use crate::time::allocator::EvalOutlook;

/// Adjudication tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdjudicationConfig {
    /// Samples required before any decision.
    pub window: usize,
    /// Resign when every sample is at or below minus this (centipawns).
    pub resign_threshold_cp: i32,
    /// Draw-offer band around zero (centipawns).
    pub draw_band_cp: i32,
    /// Piece count at or below which a level game is considered drawish.
    pub draw_max_pieces: u32,
    /// Mean evaluation beyond which the outlook counts as decided.
    pub outlook_threshold_cp: i32,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            window: 6,
            resign_threshold_cp: 800,
            draw_band_cp: 50,
            draw_max_pieces: 12,
            outlook_threshold_cp: 300,
        }
    }
}

/// Rolling window of recent evaluations, our point of view.
#[derive(Debug)]
pub struct EvalHistory {
    config: AdjudicationConfig,
    samples: VecDeque<i32>,
}

impl EvalHistory {
    /// Empty window.
    pub fn new(config: AdjudicationConfig) -> Self {
        let capacity = config.window;
        Self {
            config,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Record one search evaluation.
    pub fn push(&mut self, centipawns: i32) {
        if self.samples.len() == self.config.window {
            self.samples.pop_front();
        }
        self.samples.push_back(centipawns);
    }

    fn full(&self) -> bool {
        self.config.window > 0 && self.samples.len() >= self.config.window
    }

    /// Sustained lost evaluation: every sample in a full window at or below
    /// the resignation threshold.
    pub fn should_resign(&self) -> bool {
        self.full()
            && self
                .samples
                .iter()
                .all(|&cp| cp <= -self.config.resign_threshold_cp)
    }

    /// Sustained level evaluation in a simplified position.
    pub fn should_offer_draw(&self, piece_count: u32) -> bool {
        self.full()
            && piece_count <= self.config.draw_max_pieces
            && self
                .samples
                .iter()
                .all(|&cp| cp.abs() <= self.config.draw_band_cp)
    }

    /// Coarse outlook for the allocator. `None` until a sample exists.
    pub fn outlook(&self) -> Option<EvalOutlook> {
        if self.samples.is_empty() {
            return None;
        }
        let mean = self.samples.iter().sum::<i32>() / self.samples.len() as i32;
        Some(if mean >= self.config.outlook_threshold_cp {
            EvalOutlook::Winning
        } else if mean <= -self.config.outlook_threshold_cp {
            EvalOutlook::Losing
        } else {
            EvalOutlook::Level
        })
    }
}
