//! Outbound datagram transport
//!
//! Sends never block: a datagram that cannot be handed to the kernel right
//! away is dropped and reported, and FEC absorbs the loss.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::NetworkError;

/// Non-blocking datagram sink shared by every session
pub trait Transport: Send + Sync {
    fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> Result<(), NetworkError>;
}

/// Thread-safe handle to a transport
pub type SharedTransport = Arc<dyn Transport>;

/// Transport that records datagrams instead of sending them
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent send fail with `WouldBlock`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Remove and return everything sent so far
    pub fn take(&self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Remove and return what was sent to `addr`, keeping the rest
    pub fn take_for(&self, addr: SocketAddr) -> Vec<Bytes> {
        let mut sent = self.sent.lock();
        let (mine, rest): (Vec<_>, Vec<_>) = sent.drain(..).partition(|(to, _)| *to == addr);
        *sent = rest;
        mine.into_iter().map(|(_, datagram)| datagram).collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> Result<(), NetworkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NetworkError::WouldBlock);
        }
        self.sent.lock().push((addr, Bytes::copy_from_slice(datagram)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport() {
        let transport = MemoryTransport::new();
        let a: SocketAddr = "10.0.0.1:5001".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:5001".parse().unwrap();

        transport.send_to(b"one", a).unwrap();
        transport.send_to(b"two", b).unwrap();
        transport.send_to(b"three", a).unwrap();

        let to_a = transport.take_for(a);
        assert_eq!(to_a, vec![Bytes::from_static(b"one"), Bytes::from_static(b"three")]);
        assert_eq!(transport.len(), 1);

        transport.set_failing(true);
        assert!(matches!(transport.send_to(b"x", a), Err(NetworkError::WouldBlock)));
        assert_eq!(transport.take().len(), 1);
    }
}
