//! Per-session delivery statistics

use std::collections::VecDeque;

/// Round-trip time and loss bookkeeping for one endpoint
#[derive(Debug, Clone)]
pub struct DeliveryStats {
    /// Smoothed round-trip time (RFC 6298)
    srtt_us: Option<f64>,
    rttvar_us: f64,
    /// (received, total) units per reported group, newest last
    window: VecDeque<(u16, u16)>,
    window_len: usize,

    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub units_sent: u64,
    pub groups_acked: u64,
    pub groups_expired: u64,
    pub groups_unrecoverable: u64,
    pub malformed: u64,
    pub duplicates: u64,
    pub send_failures: u64,
}

impl DeliveryStats {
    pub fn new(window_len: usize) -> Self {
        Self {
            srtt_us: None,
            rttvar_us: 0.0,
            window: VecDeque::with_capacity(window_len),
            window_len: window_len.max(1),
            frames_sent: 0,
            frames_dropped: 0,
            units_sent: 0,
            groups_acked: 0,
            groups_expired: 0,
            groups_unrecoverable: 0,
            malformed: 0,
            duplicates: 0,
            send_failures: 0,
        }
    }

    /// Fold in one round-trip measurement
    pub fn record_rtt(&mut self, rtt_us: u64) {
        let rtt = rtt_us as f64;
        match self.srtt_us {
            None => {
                self.srtt_us = Some(rtt);
                self.rttvar_us = rtt / 2.0;
            }
            Some(srtt) => {
                self.rttvar_us = 0.75 * self.rttvar_us + 0.25 * (srtt - rtt).abs();
                self.srtt_us = Some(0.875 * srtt + 0.125 * rtt);
            }
        }
    }

    pub fn srtt_us(&self) -> Option<f64> {
        self.srtt_us
    }

    pub fn rttvar_us(&self) -> f64 {
        self.rttvar_us
    }

    /// Conservative one-way delay bound: `srtt + factor * rttvar`.
    /// One-way asymmetry is unobservable, so the full round trip is used.
    pub fn network_delay_us(&self, variance_factor: f64) -> Option<u64> {
        self.srtt_us
            .map(|srtt| (srtt + variance_factor * self.rttvar_us).max(0.0).round() as u64)
    }

    /// Record the delivery outcome of one group
    pub fn record_group(&mut self, received: u16, total: u16) {
        if total == 0 {
            return;
        }
        self.window.push_back((received.min(total), total));
        while self.window.len() > self.window_len {
            self.window.pop_front();
        }
    }

    /// Fraction of units lost over the rolling window
    pub fn loss_rate(&self) -> f32 {
        let (received, total) = self
            .window
            .iter()
            .fold((0u64, 0u64), |(r, t), &(gr, gt)| (r + gr as u64, t + gt as u64));
        if total == 0 {
            0.0
        } else {
            1.0 - received as f32 / total as f32
        }
    }

    /// Groups currently in the loss window
    pub fn loss_samples(&self) -> usize {
        self.window.len()
    }

    /// Drop RTT and loss history, keeping lifetime counters
    pub fn reset_window(&mut self) {
        self.srtt_us = None;
        self.rttvar_us = 0.0;
        self.window.clear();
    }
}
