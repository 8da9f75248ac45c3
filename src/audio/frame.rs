//! Audio frames as produced by the upstream renderer

use std::sync::Arc;

use crate::error::SchedulerError;

/// Frame containing interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    pub sample_rate: u32,
    /// Renderer timestamp in microseconds
    pub source_timestamp: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32, source_timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            source_timestamp,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples_per_channel() as u64 * 1_000_000) / self.sample_rate as u64
    }

    /// Reject frames no session could make sense of
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.channels == 0 {
            return Err(SchedulerError::InvalidFrame("zero channels".into()));
        }
        if self.sample_rate == 0 {
            return Err(SchedulerError::InvalidFrame("zero sample rate".into()));
        }
        if self.samples.is_empty() {
            return Err(SchedulerError::InvalidFrame("no samples".into()));
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(SchedulerError::InvalidFrame(format!(
                "{} samples do not divide into {} channels",
                self.samples.len(),
                self.channels
            )));
        }
        Ok(())
    }
}

/// A frame with its fleet-wide presentation timestamp, shared read-only with
/// every session
#[derive(Debug, Clone)]
pub struct StampedFrame {
    /// Controller-clock presentation instant
    pub pts: u64,
    pub frame: Arc<AudioFrame>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 960], 2, 48_000, 0, 0);
        assert_eq!(frame.samples_per_channel(), 480);
        assert_eq!(frame.duration_us(), 10_000);
    }

    #[test]
    fn test_validate() {
        assert!(AudioFrame::new(vec![0.0; 960], 2, 48_000, 0, 0).validate().is_ok());
        assert!(AudioFrame::new(vec![0.0; 961], 2, 48_000, 0, 0).validate().is_err());
        assert!(AudioFrame::new(vec![], 2, 48_000, 0, 0).validate().is_err());
        assert!(AudioFrame::new(vec![0.0; 4], 0, 48_000, 0, 0).validate().is_err());
        assert!(AudioFrame::new(vec![0.0; 4], 2, 0, 0, 0).validate().is_err());
    }
}
