//! Sine test signal, standing in for an upstream renderer

use crate::audio::frame::AudioFrame;

/// Renders consecutive frames of a sine wave on every channel
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    frequency: f32,
    amplitude: f32,
    channels: u16,
    sample_rate: u32,
    samples_per_frame: usize,
    /// Sample index of the next frame
    position: u64,
    sequence: u32,
}

impl ToneGenerator {
    pub fn new(frequency: f32, channels: u16, sample_rate: u32, frame_ms: f32) -> Self {
        let samples_per_frame = ((sample_rate as f32 * frame_ms / 1000.0) as usize).max(1);
        Self {
            frequency,
            amplitude: 0.5,
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
            samples_per_frame,
            position: 0,
            sequence: 0,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Frame period in microseconds
    pub fn frame_period_us(&self) -> u64 {
        self.samples_per_frame as u64 * 1_000_000 / self.sample_rate as u64
    }

    /// Render the next frame
    pub fn next_frame(&mut self) -> AudioFrame {
        let mut samples = Vec::with_capacity(self.samples_per_frame * self.channels as usize);
        for i in 0..self.samples_per_frame as u64 {
            let t = (self.position + i) as f64 / self.sample_rate as f64;
            let value = (t * self.frequency as f64 * 2.0 * std::f64::consts::PI).sin() as f32 * self.amplitude;
            for _ in 0..self.channels {
                samples.push(value);
            }
        }

        let source_timestamp = self.position * 1_000_000 / self.sample_rate as u64;
        let frame = AudioFrame::new(samples, self.channels, self.sample_rate, source_timestamp, self.sequence);
        self.position += self.samples_per_frame as u64;
        self.sequence = self.sequence.wrapping_add(1);
        frame
    }
}
