//! UDP socket setup and the UDP transport

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::config::NetworkConfig;
use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;
use crate::network::transport::Transport;

/// Create a non-blocking UDP socket bound to `addr`
pub fn create_socket(addr: SocketAddr, config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    // Buffer sizes are hints; the kernel may clamp them
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        tracing::warn!("Failed to set send buffer size: {}", e);
    }
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!("Failed to set receive buffer size: {}", e);
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    UdpSocket::from_std(socket.into()).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

/// Create the socket and wait until the reactor reports it writable, so the
/// first `try_send_to` does not fail with `WouldBlock`
pub async fn bind_socket(addr: SocketAddr, config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let socket = create_socket(addr, config)?;
    socket
        .writable()
        .await
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    Ok(socket)
}

/// Transport over a shared tokio UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    dropped: AtomicU64,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    /// Get statistics
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> Result<(), NetworkError> {
        if datagram.len() > MAX_PACKET_SIZE {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(NetworkError::DatagramTooLarge(datagram.len()));
        }
        match self.socket.try_send_to(datagram, addr) {
            Ok(len) => {
                self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::WouldBlock)
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }
}

/// Outbound transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_transport_loopback() {
        let config = NetworkConfig::default();
        let a = bind_socket("127.0.0.1:0".parse().unwrap(), &config).await.unwrap();
        let b = create_socket("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let b_addr = b.local_addr().unwrap();

        let transport = UdpTransport::new(Arc::new(a));
        // Sent straight after binding, before any other await
        transport.send_to(b"hello", b_addr).unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(transport.stats().datagrams_sent, 1);

        let oversized = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            transport.send_to(&oversized, b_addr),
            Err(NetworkError::DatagramTooLarge(_))
        ));
        assert_eq!(transport.stats().dropped, 1);
    }
}
