//! Presentation lookahead

use crate::config::SchedulerConfig;

/// Lookahead for the next frame: the slowest session's delay bound plus the
/// endpoint jitter buffer and a safety margin, clamped to the configured
/// range. With no delay estimates only the buffer and margin count.
pub fn compute_lookahead<I>(delays: I, config: &SchedulerConfig) -> u64
where
    I: IntoIterator<Item = u64>,
{
    let network = delays.into_iter().max().unwrap_or(0);
    let raw = network + (config.jitter_buffer_ms + config.safety_margin_ms) * 1_000;
    raw.clamp(config.min_lookahead_ms * 1_000, config.max_lookahead_ms * 1_000)
}

/// `max(now + lookahead, last + 1)`
pub fn next_presentation_ts(now: u64, lookahead: u64, last: Option<u64>) -> u64 {
    let candidate = now.saturating_add(lookahead);
    match last {
        Some(last) => candidate.max(last.saturating_add(1)),
        None => candidate,
    }
}
