//! Audio frames and PCM helpers

pub mod frame;
pub mod pcm;
pub mod tone;

pub use frame::{AudioFrame, StampedFrame};
pub use tone::ToneGenerator;
