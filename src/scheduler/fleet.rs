//! Fleet scheduler
//!
//! Owns the registry of session handles keyed by endpoint id. Each submitted
//! frame gets one presentation timestamp for the whole fleet; sessions
//! translate it into their own endpoint's clock. The scheduler only reads
//! session snapshots and never touches session state directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::audio::{AudioFrame, StampedFrame};
use crate::clock::SharedClock;
use crate::config::AppConfig;
use crate::error::{SchedulerError, SessionError};
use crate::network::{InboundSink, SharedTransport};
use crate::protocol::Packet;
use crate::scheduler::lookahead::{compute_lookahead, next_presentation_ts};
use crate::session::{Endpoint, EndpointId, SessionCommand, SessionHandle, SessionState, SpeakerSession};
use crate::status::{SessionStatus, StreamStatus};

struct SessionEntry {
    handle: SessionHandle,
    address: SocketAddr,
    /// Frames are fanned out only to admitted sessions
    admitted: bool,
}

/// Coordinates all speaker sessions of one stream
pub struct FleetScheduler {
    config: AppConfig,
    clock: SharedClock,
    transport: SharedTransport,
    sessions: DashMap<EndpointId, SessionEntry>,
    by_address: DashMap<SocketAddr, EndpointId>,
    last_pts: Mutex<Option<u64>>,
    lookahead_us: AtomicU64,
    frames_submitted: AtomicU64,
    shut_down: AtomicBool,
}

impl FleetScheduler {
    pub fn new(config: AppConfig, clock: SharedClock, transport: SharedTransport) -> Self {
        let lookahead = compute_lookahead(std::iter::empty(), &config.scheduler);
        Self {
            config,
            clock,
            transport,
            sessions: DashMap::new(),
            by_address: DashMap::new(),
            last_pts: Mutex::new(None),
            lookahead_us: AtomicU64::new(lookahead),
            frames_submitted: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    fn check_running(&self) -> Result<(), SchedulerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        Ok(())
    }

    /// Register an endpoint supplied by discovery. A lost endpoint that
    /// registers again starts over from `Registering`.
    pub fn register(&self, endpoint: Endpoint) -> Result<EndpointId, SchedulerError> {
        self.check_running()?;
        let id = endpoint.id;

        let existing = self
            .sessions
            .get(&id)
            .map(|entry| (entry.handle.snapshot().state, entry.address));
        if let Some((state, old_address)) = existing {
            if state != SessionState::Lost {
                return Err(SchedulerError::AlreadyRegistered(id.to_string()));
            }
            if let Some(mut entry) = self.sessions.get_mut(&id) {
                entry.handle
                    .send_control(SessionCommand::Reregister {
                        address: endpoint.address,
                    })
                    .map_err(|_| SchedulerError::UnknownSession(id.to_string()))?;
                entry.address = endpoint.address;
                entry.admitted = false;
            }
            self.by_address.remove(&old_address);
            self.by_address.insert(endpoint.address, id);
            tracing::info!("Speaker {} re-registered at {}", id, endpoint.address);
            return Ok(id);
        }

        let session = SpeakerSession::new(endpoint, &self.config, self.transport.clone(), self.clock.now_us());
        self.register_session(session)
    }

    /// Take over an already constructed session and start its task
    pub fn register_session(&self, session: SpeakerSession) -> Result<EndpointId, SchedulerError> {
        self.check_running()?;
        let id = session.id();
        let address = session.endpoint().address;
        if self.sessions.contains_key(&id) {
            return Err(SchedulerError::AlreadyRegistered(id.to_string()));
        }

        let handle = SessionHandle::spawn(session, self.clock.clone(), self.config.session.command_queue);
        self.sessions.insert(
            id,
            SessionEntry {
                handle,
                address,
                admitted: false,
            },
        );
        if let Some(previous) = self.by_address.insert(address, id) {
            tracing::warn!("Address {} moved from speaker {} to {}", address, previous, id);
        }
        tracing::info!("Registered speaker {} at {}", id, address);
        Ok(id)
    }

    /// Admit a session into the stream; it starts receiving frames as soon as
    /// its clock is synchronised
    pub fn admit(&self, id: EndpointId) -> Result<(), SchedulerError> {
        self.check_running()?;
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::UnknownSession(id.to_string()))?;
        entry.admitted = true;
        entry
            .handle
            .send_control(SessionCommand::Admit)
            .map_err(|_| SchedulerError::UnknownSession(id.to_string()))
    }

    /// Stop assigning frames to a session and discard its outstanding groups
    pub fn withdraw(&self, id: EndpointId) -> Result<(), SchedulerError> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::UnknownSession(id.to_string()))?;
        entry.admitted = false;
        entry
            .handle
            .send_control(SessionCommand::Withdraw)
            .map_err(|_| SchedulerError::UnknownSession(id.to_string()))
    }

    /// Discovery removal: the session is lost and its task ends
    pub fn remove(&self, id: EndpointId) -> Result<(), SchedulerError> {
        let (_, entry) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| SchedulerError::UnknownSession(id.to_string()))?;
        self.by_address.remove_if(&entry.address, |_, owner| *owner == id);
        tracing::info!("Removed speaker {}", id);
        tokio::spawn(entry.handle.close());
        Ok(())
    }

    /// Current lookahead from the sessions' delay estimates
    pub fn lookahead(&self) -> u64 {
        let delays: Vec<u64> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.handle.delay_estimate())
            .collect();
        compute_lookahead(delays, &self.config.scheduler)
    }

    /// Stamp a frame and hand it to every admitted session.
    ///
    /// Returns immediately with the presentation timestamp. Per-session
    /// trouble (full queue, desynchronised clock) only affects that session.
    pub fn submit_frame(&self, frame: AudioFrame) -> Result<u64, SchedulerError> {
        self.check_running()?;
        frame.validate()?;

        let lookahead = self.lookahead();
        self.lookahead_us.store(lookahead, Ordering::Relaxed);
        let pts = {
            let mut last = self.last_pts.lock();
            let pts = next_presentation_ts(self.clock.now_us(), lookahead, *last);
            *last = Some(pts);
            pts
        };

        let stamped = StampedFrame {
            pts,
            frame: Arc::new(frame),
        };
        for entry in self.sessions.iter().filter(|entry| entry.admitted) {
            match entry.handle.try_send(SessionCommand::Frame(stamped.clone())) {
                Ok(()) => {}
                Err(SessionError::Backlogged) => {
                    tracing::debug!("Speaker {} backlogged, frame {} dropped", entry.key(), pts);
                }
                Err(e) => tracing::trace!("Speaker {}: {}", entry.key(), e),
            }
        }

        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(pts)
    }

    /// Drive periodic work in every session
    pub fn tick(&self) {
        for entry in self.sessions.iter() {
            if let Err(e) = entry.handle.try_send(SessionCommand::Tick) {
                tracing::trace!("Tick for speaker {} skipped: {}", entry.key(), e);
            }
        }
    }

    /// Call [`tick`](Self::tick) at the configured cadence until `shutdown`
    /// flips to true
    pub async fn run_ticker(self: Arc<Self>, frame_period_us: u64, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.scheduler.tick_interval_us();
        if frame_period_us > 0 && period > frame_period_us {
            tracing::warn!(
                "Tick interval {}us is coarser than the frame period {}us; expect compounding jitter",
                period,
                frame_period_us
            );
        }

        let mut interval = tokio::time::interval(Duration::from_micros(period.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => self.tick(),
            }
        }
        tracing::debug!("Ticker stopped");
    }

    /// Status of one session
    pub fn session_status(&self, id: EndpointId) -> Option<SessionStatus> {
        self.sessions.get(&id).map(|entry| entry.handle.snapshot())
    }

    pub fn session_ids(&self) -> Vec<EndpointId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stream and session status for the control plane
    pub fn status(&self) -> StreamStatus {
        let mut sessions: Vec<SessionStatus> = self
            .sessions
            .iter()
            .map(|entry| entry.handle.snapshot())
            .collect();
        sessions.sort_by_key(|s| s.address);

        StreamStatus {
            generated_at: Utc::now(),
            active_speakers: sessions.iter().filter(|s| s.state.accepts_audio()).count(),
            registered_speakers: sessions.len(),
            current_pts: *self.last_pts.lock(),
            lookahead_us: self.lookahead_us.load(Ordering::Relaxed),
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            sessions,
        }
    }

    /// Refuse further work and end every session task
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids = self.session_ids();
        let handles: Vec<SessionHandle> = ids
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .map(|(_, entry)| entry.handle)
            .collect();
        self.by_address.clear();

        let count = handles.len();
        join_all(handles.into_iter().map(SessionHandle::close)).await;
        tracing::info!("Scheduler shut down, {} sessions closed", count);
    }
}

impl InboundSink for FleetScheduler {
    fn deliver(&self, packet: Packet, from: SocketAddr) {
        let at = self.clock.now_us();
        let Some(id) = self.by_address.get(&from).map(|id| *id) else {
            tracing::debug!("Datagram from unregistered address {}", from);
            return;
        };
        let Some(entry) = self.sessions.get(&id) else {
            return;
        };
        if let Err(e) = entry.handle.try_send(SessionCommand::Inbound { packet, at }) {
            tracing::trace!("Inbound packet for speaker {} dropped: {}", id, e);
        }
    }
}
