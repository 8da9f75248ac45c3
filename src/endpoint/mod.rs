//! Speaker endpoint: the receiving half of the transport

pub mod playout;
pub mod receiver;

pub use playout::{PlayoutQueue, PlayoutStats};
pub use receiver::{EndpointSink, EndpointStats, ReceivedFrame, SpeakerEndpoint};
