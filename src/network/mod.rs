//! Network subsystem for UDP transport

pub mod receiver;
pub mod transport;
pub mod udp;

pub use receiver::{route_datagram, run_inbound, InboundSink, InboundStats};
pub use transport::{MemoryTransport, SharedTransport, Transport};
pub use udp::{bind_socket, create_socket, TransportStats, UdpTransport};
