//! Session task: one tokio task per speaker owning its [`SpeakerSession`]

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::audio::StampedFrame;
use crate::clock::SharedClock;
use crate::error::SessionError;
use crate::protocol::Packet;
use crate::session::speaker::{EndpointId, SpeakerSession};
use crate::status::SessionStatus;

/// Work delivered to a session task. `Admit`, `Withdraw`, `Remove` and
/// `Reregister` travel on the control channel and are never dropped.
#[derive(Debug)]
pub enum SessionCommand {
    Admit,
    Withdraw,
    /// End the session and its task
    Remove,
    Reregister { address: SocketAddr },
    Frame(StampedFrame),
    Inbound { packet: Packet, at: u64 },
    Tick,
}

/// Scheduler-side handle to a running session task
pub struct SessionHandle {
    id: EndpointId,
    tx: mpsc::Sender<SessionCommand>,
    control: mpsc::UnboundedSender<SessionCommand>,
    snapshot: Arc<RwLock<SessionStatus>>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Move `session` into a new task fed by a queue of `queue` commands
    pub fn spawn(session: SpeakerSession, clock: SharedClock, queue: usize) -> Self {
        let id = session.id();
        let snapshot = Arc::new(RwLock::new(session.snapshot(clock.now_us())));
        let (tx, rx) = mpsc::channel(queue.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(session, rx, control_rx, clock, snapshot.clone()));

        Self {
            id,
            tx,
            control,
            snapshot,
            task,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Queue a command without waiting; a full queue drops it
    pub fn try_send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::Backlogged,
            TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Queue a command that must not be lost. Control commands are handled
    /// in the order sent, ahead of queued frames and packets.
    pub fn send_control(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.control.send(command).map_err(|_| SessionError::Closed)
    }

    /// Latest published status
    pub fn snapshot(&self) -> SessionStatus {
        self.snapshot.read().clone()
    }

    /// Delay bound this session contributes to the fleet lookahead, if any
    pub fn delay_estimate(&self) -> Option<u64> {
        let snapshot = self.snapshot.read();
        if snapshot.state.counts_for_lookahead() {
            snapshot.network_delay_us
        } else {
            None
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the task to remove the session and wait for it to finish
    pub async fn close(self) {
        // The task also ends once every sender is gone
        let _ = self.control.send(SessionCommand::Remove);
        drop(self.control);
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::warn!("Session task for {} failed: {}", self.id, e);
        }
    }
}

async fn run_session(
    mut session: SpeakerSession,
    mut rx: mpsc::Receiver<SessionCommand>,
    mut control: mpsc::UnboundedReceiver<SessionCommand>,
    clock: SharedClock,
    snapshot: Arc<RwLock<SessionStatus>>,
) {
    loop {
        let command = tokio::select! {
            biased;
            Some(command) = control.recv() => command,
            Some(command) = rx.recv() => command,
            else => break,
        };
        let now = clock.now_us();
        let done = matches!(command, SessionCommand::Remove);

        match command {
            SessionCommand::Admit => {
                if let Err(e) = session.admit() {
                    tracing::debug!("Speaker {}: admit ignored: {}", session.id(), e);
                }
            }
            SessionCommand::Withdraw => session.withdraw(),
            SessionCommand::Remove => session.remove(),
            SessionCommand::Reregister { address } => {
                if let Err(e) = session.reregister(address, now) {
                    tracing::debug!("Speaker {}: re-registration ignored: {}", session.id(), e);
                }
            }
            SessionCommand::Frame(stamped) => {
                if let Err(e) = session.on_frame(&stamped, now) {
                    tracing::trace!("Speaker {}: frame {} not sent: {}", session.id(), stamped.pts, e);
                }
            }
            SessionCommand::Inbound { packet, at } => session.on_packet(packet, at),
            SessionCommand::Tick => session.poll(now),
        }

        *snapshot.write() = session.snapshot(now);
        if done {
            break;
        }
    }

    tracing::debug!("Session task for {} finished in {}", session.id(), session.state());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AppConfig;
    use crate::network::MemoryTransport;
    use crate::protocol::{ControlKind, NetworkUnit, PacketFramer};
    use crate::session::{Endpoint, SessionState};

    async fn settle(handle: &SessionHandle, expect: SessionState) {
        for _ in 0..200 {
            if handle.snapshot().state == expect {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("session stuck in {:?}", handle.snapshot().state);
    }

    #[tokio::test]
    async fn test_tick_and_remove() {
        let clock = Arc::new(ManualClock::new(0));
        let transport = MemoryTransport::shared();
        let endpoint = Endpoint::new("10.0.0.9:5001".parse().unwrap(), vec![]);
        let session = SpeakerSession::new(endpoint, &AppConfig::default(), transport.clone(), 0);

        let handle = SessionHandle::spawn(session, clock.clone(), 8);
        assert_eq!(handle.snapshot().state, SessionState::Registering);

        handle.try_send(SessionCommand::Tick).unwrap();
        settle(&handle, SessionState::Syncing).await;
        assert_eq!(transport.len(), 1);

        handle.try_send(SessionCommand::Remove).unwrap();
        settle(&handle, SessionState::Lost).await;
        handle.close().await;
    }

    #[tokio::test]
    async fn test_full_queue_reports_backlog() {
        let clock = Arc::new(ManualClock::new(0));
        let endpoint = Endpoint::new("10.0.0.9:5001".parse().unwrap(), vec![]);
        let session = SpeakerSession::new(endpoint, &AppConfig::default(), MemoryTransport::shared(), 0);

        // Current-thread runtime: the task cannot drain until we yield
        let handle = SessionHandle::spawn(session, clock, 1);
        handle.try_send(SessionCommand::Tick).unwrap();
        assert_eq!(handle.try_send(SessionCommand::Tick), Err(SessionError::Backlogged));
        handle.close().await;
    }

    #[tokio::test]
    async fn test_control_commands_keep_order_behind_full_queue() {
        let clock = Arc::new(ManualClock::new(0));
        let endpoint = Endpoint::new("10.0.0.9:5001".parse().unwrap(), vec![]);
        let session = SpeakerSession::new(endpoint, &AppConfig::default(), MemoryTransport::shared(), 0);

        let handle = SessionHandle::spawn(session, clock, 1);
        handle.try_send(SessionCommand::Tick).unwrap();
        assert_eq!(handle.try_send(SessionCommand::Tick), Err(SessionError::Backlogged));

        handle.send_control(SessionCommand::Withdraw).unwrap();
        handle.send_control(SessionCommand::Admit).unwrap();
        handle.send_control(SessionCommand::Withdraw).unwrap();
        handle.send_control(SessionCommand::Admit).unwrap();
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        let snapshot = handle.snapshot();
        assert!(snapshot.admitted);
        assert_eq!(snapshot.state, SessionState::Syncing);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_close_with_full_queue_says_goodbye() {
        let clock = Arc::new(ManualClock::new(0));
        let transport = MemoryTransport::shared();
        let addr: SocketAddr = "10.0.0.9:5001".parse().unwrap();
        let session = SpeakerSession::new(Endpoint::new(addr, vec![]), &AppConfig::default(), transport.clone(), 0);

        let handle = SessionHandle::spawn(session, clock, 1);
        handle.try_send(SessionCommand::Tick).unwrap();
        handle.close().await;

        let bye = NetworkUnit::control(ControlKind::Bye);
        let units: Vec<NetworkUnit> = transport
            .take_for(addr)
            .into_iter()
            .map(|d| PacketFramer::parse(d).unwrap().unit)
            .collect();
        assert!(units.contains(&bye), "sent {:?}", units);
    }
}
