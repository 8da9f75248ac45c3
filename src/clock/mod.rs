//! Clock synchronisation between the controller and each speaker
//!
//! The controller's [`ReferenceClock`] defines presentation time. Each speaker
//! session owns a [`ClockModel`] that tracks how far (and how fast) the
//! endpoint's clock runs away from it.

pub mod model;
pub mod reference;

pub use model::{ClockEstimate, ClockModel, ClockQuality, ClockSample, SampleVerdict};
pub use reference::{ManualClock, MonotonicClock, ReferenceClock, SharedClock};
