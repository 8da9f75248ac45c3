//! Inbound sequence tracking
//!
//! Serial-number arithmetic (RFC 1982 style) on u32 sequence numbers: `a` is
//! newer than `b` when `a - b` (wrapping) lies in `1..2^31`.

/// Width of the duplicate-detection window
pub const WINDOW: u32 = 64;

/// True when `a` comes after `b`
pub fn seq_newer(a: u32, b: u32) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < 0x8000_0000
}

/// Classification of an inbound sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqVerdict {
    Fresh,
    Duplicate,
    /// Older than the window
    Stale,
}

/// Sliding 64-unit window over the sequence numbers seen from one peer
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    highest: Option<u32>,
    /// Bit `i` set: `highest - i` has been seen
    seen: u64,
    fresh: u64,
    duplicates: u64,
    stale: u64,
    /// Sequence numbers skipped over by a forward jump
    gaps: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq` and classify it
    pub fn observe(&mut self, seq: u32) -> SeqVerdict {
        let Some(highest) = self.highest else {
            self.highest = Some(seq);
            self.seen = 1;
            self.fresh += 1;
            return SeqVerdict::Fresh;
        };

        if seq_newer(seq, highest) {
            let shift = seq.wrapping_sub(highest);
            self.gaps += (shift - 1) as u64;
            self.seen = if shift >= WINDOW { 0 } else { self.seen << shift };
            self.seen |= 1;
            self.highest = Some(seq);
            self.fresh += 1;
            return SeqVerdict::Fresh;
        }

        let behind = highest.wrapping_sub(seq);
        if behind >= WINDOW {
            self.stale += 1;
            return SeqVerdict::Stale;
        }
        let bit = 1u64 << behind;
        if self.seen & bit != 0 {
            self.duplicates += 1;
            SeqVerdict::Duplicate
        } else {
            // Reordered but inside the window
            self.seen |= bit;
            self.gaps = self.gaps.saturating_sub(1);
            self.fresh += 1;
            SeqVerdict::Fresh
        }
    }

    pub fn highest(&self) -> Option<u32> {
        self.highest
    }

    pub fn fresh(&self) -> u64 {
        self.fresh
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn stale(&self) -> u64 {
        self.stale
    }

    /// Sequence numbers never seen (so far) between observed ones
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    /// Forget the peer; the next number is accepted as fresh
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_newer() {
        assert!(seq_newer(1, 0));
        assert!(!seq_newer(0, 1));
        assert!(!seq_newer(5, 5));
        assert!(seq_newer(0, u32::MAX));
        assert!(seq_newer(10, u32::MAX - 10));
        assert!(!seq_newer(u32::MAX - 10, 10));
    }

    #[test]
    fn test_fresh_and_duplicate() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(100), SeqVerdict::Fresh);
        assert_eq!(tracker.observe(101), SeqVerdict::Fresh);
        assert_eq!(tracker.observe(101), SeqVerdict::Duplicate);
        assert_eq!(tracker.observe(100), SeqVerdict::Duplicate);
        assert_eq!(tracker.duplicates(), 2);
    }

    #[test]
    fn test_reordering_inside_window() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(10);
        tracker.observe(13);
        assert_eq!(tracker.gaps(), 2);

        assert_eq!(tracker.observe(11), SeqVerdict::Fresh);
        assert_eq!(tracker.observe(12), SeqVerdict::Fresh);
        assert_eq!(tracker.observe(12), SeqVerdict::Duplicate);
        assert_eq!(tracker.gaps(), 0);
        assert_eq!(tracker.highest(), Some(13));
    }

    #[test]
    fn test_stale_outside_window() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(1_000);
        assert_eq!(tracker.observe(1_000 - WINDOW), SeqVerdict::Stale);
        assert_eq!(tracker.observe(1_000 - WINDOW + 1), SeqVerdict::Fresh);
        assert_eq!(tracker.stale(), 1);
    }

    #[test]
    fn test_wraparound() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(u32::MAX - 1);
        tracker.observe(u32::MAX);
        assert_eq!(tracker.observe(0), SeqVerdict::Fresh);
        assert_eq!(tracker.observe(1), SeqVerdict::Fresh);
        assert_eq!(tracker.observe(u32::MAX), SeqVerdict::Duplicate);
        assert_eq!(tracker.highest(), Some(1));
    }

    #[test]
    fn test_large_jump_clears_window() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(0);
        tracker.observe(500);
        assert_eq!(tracker.observe(499), SeqVerdict::Fresh);
        assert_eq!(tracker.observe(0), SeqVerdict::Stale);
    }
}
