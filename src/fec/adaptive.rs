//! Adaptive redundancy selection
//!
//! Redundancy jumps straight to what the observed loss calls for, but only
//! comes down one step at a time after a run of near-zero loss.

use crate::config::FecConfig;

/// Outcome of one recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedundancyChange {
    Raised { from: u8, to: u8 },
    Lowered { from: u8, to: u8 },
    Held(u8),
}

/// Per-session redundancy controller
#[derive(Debug, Clone)]
pub struct RedundancyController {
    min: u8,
    max: u8,
    current: u8,
    raise_threshold: f32,
    lower_threshold: f32,
    quiet_rounds_required: u32,
    quiet_rounds: u32,
    headroom: f32,
}

impl RedundancyController {
    pub fn new(config: &FecConfig) -> Self {
        Self {
            min: config.min_redundancy,
            max: config.max_redundancy,
            current: config.initial_redundancy.clamp(config.min_redundancy, config.max_redundancy),
            raise_threshold: config.raise_threshold,
            lower_threshold: config.lower_threshold,
            quiet_rounds_required: config.quiet_rounds.max(1),
            quiet_rounds: 0,
            headroom: config.headroom,
        }
    }

    /// Redundancy for the next group
    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn bounds(&self) -> (u8, u8) {
        (self.min, self.max)
    }

    /// Redundancy needed to absorb `loss_rate` on groups of `data_units`
    pub fn required_for(&self, data_units: u8, loss_rate: f32) -> u8 {
        if loss_rate <= 0.0 {
            return self.min;
        }
        let loss = loss_rate.min(0.95);
        // r/(k + r) >= loss  <=>  r >= k * loss / (1 - loss)
        let expected = data_units as f32 * loss / (1.0 - loss);
        let needed = (expected * self.headroom).ceil() + 1.0;
        (needed.min(u8::MAX as f32) as u8).clamp(self.min, self.max)
    }

    /// Recompute from the latest loss rate
    pub fn update(&mut self, loss_rate: f32, data_units: u8) -> RedundancyChange {
        let from = self.current;
        if loss_rate > self.raise_threshold {
            self.quiet_rounds = 0;
            let target = self.required_for(data_units, loss_rate);
            if target > self.current {
                self.current = target;
                return RedundancyChange::Raised { from, to: target };
            }
            return RedundancyChange::Held(from);
        }

        if loss_rate <= self.lower_threshold {
            self.quiet_rounds += 1;
            if self.quiet_rounds >= self.quiet_rounds_required && self.current > self.min {
                self.quiet_rounds = 0;
                self.current -= 1;
                return RedundancyChange::Lowered { from, to: self.current };
            }
        } else {
            self.quiet_rounds = 0;
        }
        RedundancyChange::Held(from)
    }

    /// Jump to maximum protection (degraded sessions)
    pub fn pin_max(&mut self) -> RedundancyChange {
        let from = self.current;
        self.quiet_rounds = 0;
        if from < self.max {
            self.current = self.max;
            RedundancyChange::Raised { from, to: self.max }
        } else {
            RedundancyChange::Held(from)
        }
    }
}
