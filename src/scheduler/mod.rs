//! Fleet scheduler: fans stamped frames out to every admitted session

pub mod fleet;
pub mod lookahead;

pub use fleet::FleetScheduler;
pub use lookahead::{compute_lookahead, next_presentation_ts};
