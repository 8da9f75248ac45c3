//! Inbound datagram router
//!
//! One task reads the shared socket, parses each datagram and hands valid
//! packets to a sink. Malformed input is counted and dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::constants::MAX_PACKET_SIZE;
use crate::protocol::{Packet, PacketFramer};

/// Consumer of parsed inbound packets
pub trait InboundSink: Send + Sync {
    fn deliver(&self, packet: Packet, from: SocketAddr);
}

/// Router counters
#[derive(Debug, Default)]
pub struct InboundStats {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
}

impl InboundStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn invalid_packets(&self) -> u64 {
        self.invalid_packets.load(Ordering::Relaxed)
    }
}

/// Parse one datagram and pass it on; returns false if it was malformed
pub fn route_datagram<S: InboundSink + ?Sized>(
    datagram: Bytes,
    from: SocketAddr,
    sink: &S,
    stats: &InboundStats,
) -> bool {
    stats.packets_received.fetch_add(1, Ordering::Relaxed);
    stats
        .bytes_received
        .fetch_add(datagram.len() as u64, Ordering::Relaxed);

    match PacketFramer::parse(datagram) {
        Ok(packet) => {
            sink.deliver(packet, from);
            true
        }
        Err(e) => {
            stats.invalid_packets.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dropping datagram from {}: {}", from, e);
            false
        }
    }
}

/// Receive until `shutdown` flips to true
pub async fn run_inbound<S: InboundSink + ?Sized>(
    socket: Arc<UdpSocket>,
    sink: Arc<S>,
    stats: Arc<InboundStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE + 64];

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    route_datagram(Bytes::copy_from_slice(&buf[..len]), from, sink.as_ref(), &stats);
                }
                Err(e) => {
                    // ICMP port-unreachable surfaces here on some platforms
                    tracing::debug!("Receive error: {}", e);
                }
            },
        }
    }

    tracing::info!(
        "Inbound router stopped: {} packets, {} bytes, {} invalid",
        stats.packets_received(),
        stats.bytes_received(),
        stats.invalid_packets()
    );
}
