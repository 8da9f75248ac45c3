//! Controller-side state for one speaker
//!
//! [`SpeakerSession`] is plain synchronous state: every method takes the
//! current controller time, so it can be driven by its tokio task or stepped
//! deterministically by a simulation.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::{pcm, StampedFrame};
use crate::clock::{ClockModel, ClockQuality, ClockSample, SampleVerdict};
use crate::config::{AppConfig, ClockConfig, FecConfig, SessionConfig};
use crate::constants::MAX_GROUP_UNITS;
use crate::error::{FecError, SessionError};
use crate::fec::{FecCodec, GroupLedger, RedundancyChange, RedundancyController};
use crate::network::SharedTransport;
use crate::protocol::{
    ControlKind, GroupAck, GroupUnit, NetworkUnit, Packet, PacketFramer, SeqVerdict, SequenceTracker,
};
use crate::session::state::{SessionEvent, SessionState};
use crate::session::stats::DeliveryStats;
use crate::status::{wall_clock_ago, SessionStatus};

/// Stable endpoint identity
pub type EndpointId = Uuid;

/// What a speaker can render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub channels: u16,
    pub max_sample_rate: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            channels: crate::constants::DEFAULT_CHANNELS,
            max_sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
        }
    }
}

/// A speaker as supplied by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub address: SocketAddr,
    pub capabilities: Capabilities,
    /// Source channels this speaker renders, in order; empty means all
    pub channel_map: Vec<u16>,
}

impl Endpoint {
    pub fn new(address: SocketAddr, channel_map: Vec<u16>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            capabilities: Capabilities::default(),
            channel_map,
        }
    }
}

/// One endpoint's clock model, framer, FEC state and delivery statistics
pub struct SpeakerSession {
    endpoint: Endpoint,
    state: SessionState,
    admitted: bool,

    clock: ClockModel,
    framer: PacketFramer,
    inbound: SequenceTracker,
    codec: FecCodec,
    redundancy: RedundancyController,
    ledger: GroupLedger,
    stats: DeliveryStats,
    transport: SharedTransport,

    clock_config: ClockConfig,
    fec_config: FecConfig,
    config: SessionConfig,
    rtt_variance_factor: f64,

    next_probe_id: u32,
    /// probe id -> controller send time
    pending_probes: HashMap<u32, u64>,
    next_probe_at: u64,
    next_recompute_at: u64,
    registered_at: u64,
    last_seen: Option<u64>,
    /// Latest acknowledgement in the current streaming run
    last_ack_at: Option<u64>,
}

impl SpeakerSession {
    pub fn new(endpoint: Endpoint, config: &AppConfig, transport: SharedTransport, now: u64) -> Self {
        Self {
            endpoint,
            state: SessionState::Registering,
            admitted: false,
            clock: ClockModel::new(config.clock.clone()),
            framer: PacketFramer::new(),
            inbound: SequenceTracker::new(),
            codec: FecCodec::new(),
            redundancy: RedundancyController::new(&config.fec),
            ledger: GroupLedger::new(),
            stats: DeliveryStats::new(config.session.loss_window_groups),
            transport,
            clock_config: config.clock.clone(),
            fec_config: config.fec.clone(),
            config: config.session.clone(),
            rtt_variance_factor: config.scheduler.rtt_variance_factor,
            next_probe_id: 0,
            pending_probes: HashMap::new(),
            next_probe_at: now,
            next_recompute_at: now + config.fec.recompute_interval_us(),
            registered_at: now,
            last_seen: None,
            last_ack_at: None,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.endpoint.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_admitted(&self) -> bool {
        self.admitted
    }

    pub fn clock(&self) -> &ClockModel {
        &self.clock
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn redundancy(&self) -> u8 {
        self.redundancy.current()
    }

    pub fn outstanding_groups(&self) -> usize {
        self.ledger.len()
    }

    /// Apply a state machine event, logging the outcome
    fn apply(&mut self, event: SessionEvent) -> bool {
        match self.state.transition(event) {
            Ok(next) => {
                tracing::info!(
                    "Speaker {} ({}): {} -> {} on {:?}",
                    self.endpoint.id,
                    self.endpoint.address,
                    self.state,
                    next,
                    event
                );
                if next == SessionState::Streaming {
                    self.last_ack_at = None;
                }
                self.state = next;
                true
            }
            Err(e) => {
                tracing::debug!("Speaker {}: {}", self.endpoint.id, e);
                false
            }
        }
    }

    fn send(&mut self, unit: NetworkUnit) -> bool {
        let datagram = match self.framer.frame(unit) {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::warn!("Speaker {}: cannot frame unit: {}", self.endpoint.id, e);
                return false;
            }
        };
        match self.transport.send_to(&datagram, self.endpoint.address) {
            Ok(()) => true,
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::trace!("Speaker {}: send failed: {}", self.endpoint.id, e);
                false
            }
        }
    }

    /// Let the scheduler stream to this session once it is synchronised
    pub fn admit(&mut self) -> Result<(), SessionError> {
        if self.state.is_lost() {
            return Err(SessionError::NotAccepting(self.state));
        }
        self.admitted = true;
        self.advance();
        Ok(())
    }

    /// Stop streaming: outstanding groups are discarded and the endpoint told
    /// to flush
    pub fn withdraw(&mut self) {
        self.admitted = false;
        let dropped = self.ledger.clear();
        if self.state.accepts_audio() {
            self.apply(SessionEvent::Withdrawn);
        }
        if !self.state.is_lost() {
            self.send(NetworkUnit::control(ControlKind::Withdraw));
        }
        tracing::debug!(
            "Speaker {} withdrawn, {} outstanding groups discarded",
            self.endpoint.id,
            dropped
        );
    }

    /// Discovery removal: the session is lost and the endpoint told so
    pub fn remove(&mut self) {
        self.admitted = false;
        self.ledger.clear();
        if !self.state.is_lost() {
            self.send(NetworkUnit::control(ControlKind::Bye));
            self.apply(SessionEvent::Removed);
        }
    }

    /// Fresh registration of a lost endpoint; all clock history is dropped
    pub fn reregister(&mut self, address: SocketAddr, now: u64) -> Result<(), SessionError> {
        if !self.apply(SessionEvent::Reregistered) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                event: SessionEvent::Reregistered,
            });
        }
        self.endpoint.address = address;
        self.admitted = false;
        self.clock.reset();
        self.inbound.reset();
        self.ledger.clear();
        self.stats.reset_window();
        self.redundancy = RedundancyController::new(&self.fec_config);
        self.pending_probes.clear();
        self.next_probe_at = now;
        self.registered_at = now;
        self.last_seen = None;
        self.last_ack_at = None;
        Ok(())
    }

    /// Periodic work: liveness, clock timeout, probes, group expiry and
    /// adaptive FEC
    pub fn poll(&mut self, now: u64) {
        if self.state.is_lost() {
            return;
        }

        if self.is_unreachable(now) {
            tracing::warn!(
                "Speaker {} unreachable for {}ms",
                self.endpoint.id,
                self.config.unreachable_timeout_ms
            );
            self.ledger.clear();
            self.apply(SessionEvent::Unreachable);
            return;
        }

        if self.clock.check_timeout(now) {
            tracing::warn!(
                "Speaker {}: no valid sync sample for {}ms, clock desynchronized",
                self.endpoint.id,
                self.clock_config.sync_timeout_ms
            );
            if matches!(
                self.state,
                SessionState::Ready | SessionState::Streaming | SessionState::Degraded
            ) {
                self.apply(SessionEvent::ClockDesync);
            }
        }

        if now >= self.next_probe_at {
            self.send_probe(now);
            self.next_probe_at = now + self.clock_config.probe_interval_us();
        }
        let probe_ttl = self.clock_config.sync_timeout_us();
        self.pending_probes
            .retain(|_, sent| now.saturating_sub(*sent) <= probe_ttl);

        for group in self.ledger.expire(now) {
            self.stats.groups_expired += 1;
            self.stats.record_group(0, group.total_units());
            tracing::trace!("Speaker {}: group {} expired unacknowledged", self.endpoint.id, group.id);
        }

        if now >= self.next_recompute_at {
            self.recompute_redundancy();
            self.next_recompute_at = now + self.fec_config.recompute_interval_us();
        }

        self.evaluate_loss(now);
        self.advance();
    }

    fn is_unreachable(&self, now: u64) -> bool {
        let timeout = self.config.unreachable_timeout_us();
        match self.state {
            SessionState::Registering | SessionState::Syncing => {
                let heard = self.last_seen.unwrap_or(self.registered_at);
                now.saturating_sub(heard) > timeout
            }
            // Sync replies keep a degraded endpoint visible but only acks
            // prove it is still playing
            SessionState::Degraded => self
                .last_ack_at
                .is_some_and(|acked| now.saturating_sub(acked) > timeout),
            _ => false,
        }
    }

    fn send_probe(&mut self, now: u64) {
        let probe_id = self.next_probe_id;
        self.next_probe_id = self.next_probe_id.wrapping_add(1);
        self.pending_probes.insert(probe_id, now);
        self.send(NetworkUnit::SyncProbe {
            probe_id,
            send_ts: now,
        });
        if self.state == SessionState::Registering {
            self.apply(SessionEvent::ProbeSent);
        }
    }

    fn recompute_redundancy(&mut self) {
        let change = if self.state == SessionState::Degraded {
            self.redundancy.pin_max()
        } else {
            self.redundancy
                .update(self.stats.loss_rate(), self.fec_config.data_units_per_group)
        };
        match change {
            RedundancyChange::Raised { from, to } | RedundancyChange::Lowered { from, to } => {
                tracing::debug!(
                    "Speaker {}: redundancy {} -> {} (loss {:.1}%)",
                    self.endpoint.id,
                    from,
                    to,
                    self.stats.loss_rate() * 100.0
                );
            }
            RedundancyChange::Held(_) => {}
        }
    }

    fn evaluate_loss(&mut self, now: u64) {
        if self.stats.loss_samples() < self.config.min_loss_samples {
            return;
        }
        let loss = self.stats.loss_rate();
        match self.state {
            SessionState::Streaming if loss > self.config.degraded_loss => {
                tracing::warn!(
                    "Speaker {}: loss {:.1}% beyond what FEC can absorb",
                    self.endpoint.id,
                    loss * 100.0
                );
                if self.apply(SessionEvent::LossExceeded) {
                    self.last_ack_at.get_or_insert(now);
                }
                self.redundancy.pin_max();
            }
            SessionState::Degraded if loss < self.config.recover_loss => {
                self.apply(SessionEvent::LossSubsided);
            }
            _ => {}
        }
    }

    /// Take the automatic forward steps: fine clock -> Ready, admitted -> Streaming
    fn advance(&mut self) {
        if self.state == SessionState::Syncing && self.clock.quality() == ClockQuality::Fine {
            self.apply(SessionEvent::ClockFine);
        }
        if self.state == SessionState::Ready && self.admitted {
            self.apply(SessionEvent::Admitted);
        }
    }

    /// Frame, protect and send one stamped frame
    pub fn on_frame(&mut self, stamped: &StampedFrame, now: u64) -> Result<(), SessionError> {
        if !self.state.accepts_audio() {
            self.stats.frames_dropped += 1;
            return Err(SessionError::NotAccepting(self.state));
        }
        if self.clock.quality() == ClockQuality::Unsynced {
            self.stats.frames_dropped += 1;
            return Err(SessionError::ClockDesync);
        }

        let deadline = self.clock.estimate().to_remote(stamped.pts);
        let payload = pcm::extract_s16le(&stamped.frame, &self.endpoint.channel_map);
        let redundancy = self.redundancy.current();
        let chunks = match split_payload(
            payload,
            self.fec_config.data_units_per_group,
            self.fec_config.max_unit_payload,
            redundancy,
        ) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.stats.frames_dropped += 1;
                return Err(e.into());
            }
        };
        let data_units = chunks.len() as u8;

        let units = match self.codec.encode(&chunks, redundancy) {
            Ok(units) => units,
            Err(e) => {
                self.stats.frames_dropped += 1;
                return Err(e.into());
            }
        };
        let group = self
            .ledger
            .open(data_units, redundancy, stamped.pts, now, self.config.ack_grace_us());

        for (index, payload) in units.into_iter().enumerate() {
            let unit = GroupUnit {
                group_id: group.id,
                index: index as u8,
                data_units,
                redundancy,
                presentation_ts: deadline,
                payload,
            };
            let unit = if unit.is_data() {
                NetworkUnit::Audio(unit)
            } else {
                NetworkUnit::Redundancy(unit)
            };
            if self.send(unit) {
                self.stats.units_sent += 1;
            }
        }
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Handle one packet from the endpoint, received at `at`
    pub fn on_packet(&mut self, packet: Packet, at: u64) {
        if self.state.is_lost() {
            return;
        }
        match self.inbound.observe(packet.seq) {
            SeqVerdict::Fresh => {}
            SeqVerdict::Duplicate | SeqVerdict::Stale => {
                self.stats.duplicates += 1;
                return;
            }
        }
        self.last_seen = Some(self.last_seen.map_or(at, |t| t.max(at)));

        match packet.unit {
            NetworkUnit::SyncReply {
                probe_id,
                recv_ts,
                send_ts,
            } => self.on_sync_reply(probe_id, recv_ts, send_ts, at),
            NetworkUnit::Control {
                kind: ControlKind::Ack,
                args,
            } => self.on_ack(&args, at),
            NetworkUnit::Control {
                kind: ControlKind::Bye,
                ..
            } => {
                tracing::info!("Speaker {} said goodbye", self.endpoint.id);
                self.admitted = false;
                self.ledger.clear();
                self.apply(SessionEvent::Removed);
            }
            other => {
                tracing::debug!(
                    "Speaker {}: ignoring unexpected {:?} unit",
                    self.endpoint.id,
                    other.kind()
                );
            }
        }
    }

    fn on_sync_reply(&mut self, probe_id: u32, recv_ts: u64, send_ts: u64, at: u64) {
        let Some(sent) = self.pending_probes.remove(&probe_id) else {
            tracing::trace!("Speaker {}: reply to unknown probe {}", self.endpoint.id, probe_id);
            return;
        };
        let sample = ClockSample::new(sent, recv_ts, send_ts, at);
        match self.clock.record_sample(sample) {
            SampleVerdict::Rejected(e) => {
                tracing::debug!("Speaker {}: sync sample rejected: {}", self.endpoint.id, e);
                return;
            }
            SampleVerdict::Outlier => {
                tracing::trace!(
                    "Speaker {}: outlier sample, delay {}us",
                    self.endpoint.id,
                    sample.round_trip_delay()
                );
            }
            SampleVerdict::Accepted => {}
        }
        self.stats.record_rtt(sample.round_trip_delay().max(0) as u64);
        self.advance();
    }

    fn on_ack(&mut self, args: &Bytes, at: u64) {
        let ack = match GroupAck::from_args(args) {
            Ok(ack) => ack,
            Err(e) => {
                self.stats.malformed += 1;
                tracing::debug!("Speaker {}: bad ack: {}", self.endpoint.id, e);
                return;
            }
        };
        let Some(group) = self.ledger.acknowledge(ack.group_id) else {
            tracing::trace!("Speaker {}: ack for unknown group {}", self.endpoint.id, ack.group_id);
            return;
        };
        self.last_ack_at = Some(self.last_ack_at.map_or(at, |t| t.max(at)));
        self.stats.groups_acked += 1;
        self.stats.record_group(ack.received, group.total_units());
        if !ack.recovered {
            self.stats.groups_unrecoverable += 1;
            tracing::warn!(
                "Speaker {}: group {} unrecoverable ({} of {} units arrived)",
                self.endpoint.id,
                group.id,
                ack.received,
                group.total_units()
            );
        }
    }

    /// Status report as of `now`
    pub fn snapshot(&self, now: u64) -> SessionStatus {
        let estimate = self.clock.estimate();
        SessionStatus {
            endpoint_id: self.endpoint.id,
            address: self.endpoint.address,
            state: self.state,
            admitted: self.admitted,
            clock_quality: self.clock.quality(),
            clock_offset_us: estimate.offset_us,
            clock_drift_ppm: estimate.drift_ppm,
            srtt_us: self.stats.srtt_us(),
            rttvar_us: self.stats.rttvar_us(),
            network_delay_us: self.stats.network_delay_us(self.rtt_variance_factor),
            loss_rate: self.stats.loss_rate(),
            redundancy: self.redundancy.current(),
            outstanding_groups: self.ledger.len(),
            frames_sent: self.stats.frames_sent,
            frames_dropped: self.stats.frames_dropped,
            units_sent: self.stats.units_sent,
            groups_acked: self.stats.groups_acked,
            groups_expired: self.stats.groups_expired,
            groups_unrecoverable: self.stats.groups_unrecoverable,
            duplicates: self.stats.duplicates,
            malformed: self.stats.malformed,
            last_seen: self.last_seen.map(|t| wall_clock_ago(now.saturating_sub(t))),
        }
    }
}

/// Cut a frame payload into `k` nearly equal data units, with `k` at least
/// `min_units` and large enough that no unit exceeds `max_unit`
pub fn split_payload(payload: Bytes, min_units: u8, max_unit: usize, redundancy: u8) -> Result<Vec<Bytes>, FecError> {
    let max_unit = max_unit.max(1);
    let needed = payload.len().div_ceil(max_unit).max(min_units.max(1) as usize);
    if needed + redundancy as usize > MAX_GROUP_UNITS {
        return Err(FecError::InvalidGroup(format!(
            "frame of {} bytes needs {} data units",
            payload.len(),
            needed
        )));
    }
    let chunk = payload.len().div_ceil(needed);
    Ok((0..needed)
        .map(|i| {
            let start = (i * chunk).min(payload.len());
            let end = (start + chunk).min(payload.len());
            payload.slice(start..end)
        })
        .collect())
}
