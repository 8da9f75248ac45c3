//! Forward error correction
//!
//! Audio frames are split into `k` data units and protected with `r`
//! redundancy units computed by a systematic Cauchy Reed-Solomon code, so any
//! `k` of the `k + r` units reconstruct the frame.

pub mod adaptive;
pub mod codec;
pub mod gf256;
pub mod group;

pub use adaptive::{RedundancyChange, RedundancyController};
pub use codec::FecCodec;
pub use group::{FecGroup, GroupLedger};
