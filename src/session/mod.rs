//! Speaker sessions: per-endpoint state machine, delivery statistics and the
//! task that owns them

pub mod speaker;
pub mod state;
pub mod stats;
pub mod task;

pub use speaker::{split_payload, Capabilities, Endpoint, EndpointId, SpeakerSession};
pub use state::{SessionEvent, SessionState};
pub use stats::DeliveryStats;
pub use task::{SessionCommand, SessionHandle};
