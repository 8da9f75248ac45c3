//! Per-endpoint clock offset and drift estimator
//!
//! Each sync exchange yields four timestamps:
//!
//! ```text
//!   controller  t1 ──────────────┐          ┌──────────► t4
//!                                 ▼          │
//!   endpoint                      t2 ──── t3 ┘
//! ```
//!
//! `delay = (t4 - t1) - (t3 - t2)` and `offset = ((t2 - t1) + (t3 - t4)) / 2`,
//! where offset is endpoint clock minus controller clock. Offset and drift
//! are tracked with an alpha-beta filter; samples whose delay is far above
//! the rolling median (queued behind other traffic on one leg, so their
//! offset is skewed) only nudge the estimate.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::ClockConfig;
use crate::error::ClockError;

/// One completed sync exchange. All values in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// t1: probe left the controller (controller clock)
    pub local_send: u64,
    /// t2: probe reached the endpoint (endpoint clock)
    pub remote_receive: u64,
    /// t3: reply left the endpoint (endpoint clock)
    pub remote_send: u64,
    /// t4: reply reached the controller (controller clock)
    pub local_receive: u64,
}

impl ClockSample {
    pub fn new(local_send: u64, remote_receive: u64, remote_send: u64, local_receive: u64) -> Self {
        Self {
            local_send,
            remote_receive,
            remote_send,
            local_receive,
        }
    }

    /// Network round-trip time excluding endpoint processing
    pub fn round_trip_delay(&self) -> i64 {
        (self.local_receive as i64 - self.local_send as i64)
            - (self.remote_send as i64 - self.remote_receive as i64)
    }

    /// Measured offset (endpoint minus controller)
    pub fn offset(&self) -> f64 {
        ((self.remote_receive as f64 - self.local_send as f64)
            + (self.remote_send as f64 - self.local_receive as f64))
            / 2.0
    }

    /// Controller-clock instant the measured offset refers to
    pub fn local_midpoint(&self) -> u64 {
        self.local_send + (self.local_receive.saturating_sub(self.local_send)) / 2
    }

    /// Reject physically impossible exchanges
    pub fn validate(&self) -> Result<(), ClockError> {
        if self.local_receive < self.local_send || self.remote_send < self.remote_receive {
            return Err(ClockError::OutOfOrder);
        }
        let delay = self.round_trip_delay();
        if delay < 0 {
            return Err(ClockError::NegativeDelay(delay));
        }
        Ok(())
    }
}

/// Synchronisation quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClockQuality {
    Unsynced,
    Coarse,
    Fine,
}

/// What the model did with a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleVerdict {
    Accepted,
    /// Accepted with reduced weight
    Outlier,
    Rejected(ClockError),
}

/// Current offset/drift estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockEstimate {
    /// Endpoint minus controller at `reference_us`
    pub offset_us: f64,
    /// Rate at which the offset grows, parts per million
    pub drift_ppm: f64,
    /// Controller-clock instant `offset_us` refers to
    pub reference_us: u64,
    /// Estimated variance of the offset
    pub variance_us2: f64,
    /// Samples that contributed since registration
    pub samples: u64,
}

impl Default for ClockEstimate {
    fn default() -> Self {
        Self {
            offset_us: 0.0,
            drift_ppm: 0.0,
            reference_us: 0,
            variance_us2: f64::INFINITY,
            samples: 0,
        }
    }
}

impl ClockEstimate {
    /// Offset extrapolated to a controller-clock instant
    pub fn offset_at(&self, local_us: u64) -> f64 {
        let elapsed = local_us as f64 - self.reference_us as f64;
        self.offset_us + self.drift_ppm * 1e-6 * elapsed
    }

    /// Translate a controller-clock instant into the endpoint's clock
    pub fn to_remote(&self, local_us: u64) -> u64 {
        let remote = local_us as f64 + self.offset_at(local_us);
        remote.round().max(0.0) as u64
    }

    /// Translate an endpoint-clock instant back into the controller's clock
    pub fn to_local(&self, remote_us: u64) -> u64 {
        let guess = (remote_us as f64 - self.offset_us).max(0.0) as u64;
        let local = remote_us as f64 - self.offset_at(guess);
        local.round().max(0.0) as u64
    }
}

/// Clock model for one endpoint. Only the owning session mutates it.
#[derive(Debug, Clone)]
pub struct ClockModel {
    config: ClockConfig,
    /// Recent round-trip delays, for the outlier median
    delays: VecDeque<i64>,
    estimate: Option<ClockEstimate>,
    /// Valid samples since the last (re)synchronisation
    samples_since_sync: u32,
    /// Controller time of the last valid sample
    last_valid_at: Option<u64>,
    outliers: u64,
    rejected: u64,
}

impl ClockModel {
    pub fn new(config: ClockConfig) -> Self {
        let window = config.window;
        Self {
            config,
            delays: VecDeque::with_capacity(window),
            estimate: None,
            samples_since_sync: 0,
            last_valid_at: None,
            outliers: 0,
            rejected: 0,
        }
    }

    /// Feed one sync exchange into the estimate
    pub fn record_sample(&mut self, sample: ClockSample) -> SampleVerdict {
        if let Err(e) = sample.validate() {
            self.rejected += 1;
            return SampleVerdict::Rejected(e);
        }

        let delay = sample.round_trip_delay();
        let outlier = self.is_outlier(delay);
        self.delays.push_back(delay);
        while self.delays.len() > self.config.window {
            self.delays.pop_front();
        }

        let weight = if outlier { self.config.outlier_weight } else { 1.0 };
        let measured = sample.offset();
        let at = sample.local_midpoint();

        match self.estimate.as_mut() {
            None => {
                // Offset error of a single exchange is bounded by half the delay
                let half = delay as f64 / 2.0;
                self.estimate = Some(ClockEstimate {
                    offset_us: measured,
                    drift_ppm: 0.0,
                    reference_us: at,
                    variance_us2: half * half / 3.0,
                    samples: 1,
                });
            }
            Some(est) => {
                let dt = at as f64 - est.reference_us as f64;
                let predicted = est.offset_at(at.max(est.reference_us));
                let residual = measured - predicted;
                let gain = self.config.offset_gain * weight;

                est.offset_us = predicted + gain * residual;
                if dt > 0.0 {
                    let correction = self.config.drift_gain * weight * residual / dt * 1e6;
                    est.drift_ppm = (est.drift_ppm + correction)
                        .clamp(-self.config.max_drift_ppm, self.config.max_drift_ppm);
                    est.reference_us = at;
                }
                est.variance_us2 = (1.0 - gain) * (est.variance_us2 + gain * residual * residual);
                est.samples += 1;
            }
        }

        self.samples_since_sync = self.samples_since_sync.saturating_add(1);
        self.last_valid_at = Some(self.last_valid_at.map_or(sample.local_receive, |t| {
            t.max(sample.local_receive)
        }));

        if outlier {
            self.outliers += 1;
            SampleVerdict::Outlier
        } else {
            SampleVerdict::Accepted
        }
    }

    fn is_outlier(&self, delay: i64) -> bool {
        if self.delays.len() < self.config.coarse_min_samples as usize {
            return false;
        }
        let mut sorted: Vec<i64> = self.delays.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2].max(self.config.outlier_floor_us as i64);
        delay as f64 > median as f64 * self.config.outlier_multiple
    }

    /// Current estimate; zero offset with infinite variance before any sample
    pub fn estimate(&self) -> ClockEstimate {
        self.estimate.unwrap_or_default()
    }

    pub fn quality(&self) -> ClockQuality {
        let Some(est) = self.estimate else {
            return ClockQuality::Unsynced;
        };
        if self.samples_since_sync < self.config.coarse_min_samples {
            ClockQuality::Unsynced
        } else if self.samples_since_sync >= self.config.fine_min_samples
            && est.variance_us2 < self.config.fine_variance_us2
        {
            ClockQuality::Fine
        } else {
            ClockQuality::Coarse
        }
    }

    /// Revert to `Unsynced` when no valid sample arrived for the sync timeout.
    /// Returns true on the transition. The estimate itself is kept and keeps
    /// being refined once samples resume.
    pub fn check_timeout(&mut self, now_us: u64) -> bool {
        if self.samples_since_sync == 0 {
            return false;
        }
        let Some(last) = self.last_valid_at else {
            return false;
        };
        if now_us.saturating_sub(last) <= self.config.sync_timeout_us() {
            return false;
        }
        self.samples_since_sync = 0;
        self.delays.clear();
        true
    }

    /// Forget everything; only used on re-registration
    pub fn reset(&mut self) {
        self.delays.clear();
        self.estimate = None;
        self.samples_since_sync = 0;
        self.last_valid_at = None;
    }

    pub fn last_valid_at(&self) -> Option<u64> {
        self.last_valid_at
    }

    pub fn outliers(&self) -> u64 {
        self.outliers
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
