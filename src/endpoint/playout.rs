//! Deadline-ordered playout queue
//!
//! Frames are held until their local deadline and released in deadline
//! order. Frames that arrive after their deadline, or are popped too long
//! after it, are counted as late and never rendered.

use std::collections::BTreeMap;

use crate::endpoint::receiver::ReceivedFrame;

pub struct PlayoutQueue {
    frames: BTreeMap<u64, ReceivedFrame>,
    capacity: usize,
    /// How far past its deadline a frame may still be rendered
    tolerance_us: u64,
    received: u64,
    played: u64,
    late: u64,
    overflow: u64,
    duplicates: u64,
}

impl PlayoutQueue {
    pub fn new(capacity: usize, tolerance_us: u64) -> Self {
        Self {
            frames: BTreeMap::new(),
            capacity: capacity.max(1),
            tolerance_us,
            received: 0,
            played: 0,
            late: 0,
            overflow: 0,
            duplicates: 0,
        }
    }

    /// Queue a frame; returns false if it was dropped
    pub fn insert(&mut self, frame: ReceivedFrame, now: u64) -> bool {
        self.received += 1;
        if frame.deadline.saturating_add(self.tolerance_us) < now {
            self.late += 1;
            return false;
        }
        if self.frames.contains_key(&frame.deadline) {
            self.duplicates += 1;
            return false;
        }
        if self.frames.len() >= self.capacity {
            self.overflow += 1;
            return false;
        }
        self.frames.insert(frame.deadline, frame);
        true
    }

    /// Release every frame whose deadline has arrived, oldest first
    pub fn pop_due(&mut self, now: u64) -> Vec<ReceivedFrame> {
        let pending = self.frames.split_off(&now.saturating_add(1));
        let due = std::mem::replace(&mut self.frames, pending);

        let mut out = Vec::with_capacity(due.len());
        for (deadline, frame) in due {
            if deadline.saturating_add(self.tolerance_us) < now {
                self.late += 1;
            } else {
                self.played += 1;
                out.push(frame);
            }
        }
        out
    }

    /// Deadline of the next frame to render
    pub fn next_deadline(&self) -> Option<u64> {
        self.frames.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Get statistics
    pub fn stats(&self) -> PlayoutStats {
        PlayoutStats {
            level: self.frames.len(),
            capacity: self.capacity,
            received: self.received,
            played: self.played,
            late: self.late,
            overflow: self.overflow,
            duplicates: self.duplicates,
        }
    }
}

/// Playout queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayoutStats {
    pub level: usize,
    pub capacity: usize,
    pub received: u64,
    pub played: u64,
    pub late: u64,
    pub overflow: u64,
    pub duplicates: u64,
}

impl PlayoutStats {
    pub fn late_rate(&self) -> f32 {
        if self.received == 0 {
            0.0
        } else {
            self.late as f32 / self.received as f32
        }
    }
}
