//! Speaker side of the protocol
//!
//! Answers sync probes, reassembles FEC groups, hands decoded frames to the
//! playout side and acknowledges every group once, either when all of its
//! units arrived or when its deadline passed.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::audio::pcm;
use crate::clock::SharedClock;
use crate::config::EndpointConfig;
use crate::fec::FecCodec;
use crate::network::{InboundSink, SharedTransport};
use crate::protocol::{
    ControlKind, GroupAck, GroupUnit, NetworkUnit, Packet, PacketFramer, SeqVerdict, SequenceTracker,
};

/// Finished group ids are remembered this long past their deadline so that
/// stragglers are recognised as late
const FINISHED_RETENTION_US: u64 = 2_000_000;

/// A reconstructed frame ready for playout
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    pub group_id: u32,
    /// Render instant on this endpoint's clock
    pub deadline: u64,
    /// Interleaved samples of this speaker's channels
    pub samples: Vec<f32>,
    pub channels: u16,
    /// Redundancy units were needed to rebuild it
    pub recovered: bool,
}

struct PendingGroup {
    data_units: u8,
    redundancy: u8,
    deadline: u64,
    slots: Vec<Option<Bytes>>,
    received: u16,
    delivered: bool,
}

impl PendingGroup {
    fn new(unit: &GroupUnit) -> Self {
        Self {
            data_units: unit.data_units,
            redundancy: unit.redundancy,
            deadline: unit.presentation_ts,
            slots: vec![None; unit.total_units()],
            received: 0,
            delivered: false,
        }
    }

    fn total(&self) -> u16 {
        self.slots.len() as u16
    }
}

/// Endpoint counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub probes_answered: u64,
    pub units_received: u64,
    pub units_late: u64,
    pub duplicates: u64,
    pub inconsistent_units: u64,
    pub frames_delivered: u64,
    pub frames_recovered: u64,
    pub groups_lost: u64,
    pub delivery_overflow: u64,
    pub acks_sent: u64,
    pub withdrawals: u64,
}

/// Protocol state of one speaker
pub struct SpeakerEndpoint {
    channels: u16,
    transport: SharedTransport,
    framer: PacketFramer,
    inbound: SequenceTracker,
    codec: FecCodec,
    controller: Option<SocketAddr>,
    groups: HashMap<u32, PendingGroup>,
    /// group id -> deadline of groups already acknowledged
    finished: HashMap<u32, u64>,
    delivery: Sender<ReceivedFrame>,
    stats: EndpointStats,
}

impl SpeakerEndpoint {
    /// Create an endpoint and the channel its frames are delivered on
    pub fn new(config: &EndpointConfig, transport: SharedTransport) -> (Self, Receiver<ReceivedFrame>) {
        let (tx, rx) = bounded(config.delivery_queue.max(1));
        let endpoint = Self {
            channels: config.channels,
            transport,
            framer: PacketFramer::new(),
            inbound: SequenceTracker::new(),
            codec: FecCodec::new(),
            controller: None,
            groups: HashMap::new(),
            finished: HashMap::new(),
            delivery: tx,
            stats: EndpointStats::default(),
        };
        (endpoint, rx)
    }

    /// Controller this endpoint currently answers to
    pub fn controller(&self) -> Option<SocketAddr> {
        self.controller
    }

    /// Get statistics
    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    fn send(&mut self, unit: NetworkUnit, to: SocketAddr) {
        match self.framer.frame(unit) {
            Ok(datagram) => {
                if let Err(e) = self.transport.send_to(&datagram, to) {
                    tracing::trace!("Send to controller {} failed: {}", to, e);
                }
            }
            Err(e) => tracing::warn!("Cannot frame reply: {}", e),
        }
    }

    /// Parse and handle one datagram; malformed input is dropped
    pub fn handle_datagram(&mut self, datagram: Bytes, from: SocketAddr, now: u64) {
        match PacketFramer::parse(datagram) {
            Ok(packet) => self.handle_packet(packet, from, now),
            Err(e) => tracing::debug!("Dropping datagram from {}: {}", from, e),
        }
    }

    /// Handle one packet received at `now` (endpoint clock)
    pub fn handle_packet(&mut self, packet: Packet, from: SocketAddr, now: u64) {
        if self.controller != Some(from) {
            if let Some(previous) = self.controller {
                tracing::info!("Controller moved from {} to {}", previous, from);
            } else {
                tracing::info!("Controller at {}", from);
            }
            self.controller = Some(from);
            self.inbound.reset();
        }

        match self.inbound.observe(packet.seq) {
            SeqVerdict::Fresh => {}
            SeqVerdict::Duplicate | SeqVerdict::Stale => {
                self.stats.duplicates += 1;
                return;
            }
        }

        match packet.unit {
            NetworkUnit::SyncProbe { probe_id, .. } => {
                self.stats.probes_answered += 1;
                self.send(
                    NetworkUnit::SyncReply {
                        probe_id,
                        recv_ts: now,
                        send_ts: now,
                    },
                    from,
                );
            }
            NetworkUnit::Audio(unit) | NetworkUnit::Redundancy(unit) => self.on_unit(unit, now),
            NetworkUnit::Control {
                kind: ControlKind::Withdraw,
                ..
            } => {
                self.stats.withdrawals += 1;
                let flushed = self.groups.len();
                for (id, group) in self.groups.drain() {
                    self.finished.insert(id, group.deadline);
                }
                tracing::info!("Stream withdrawn, {} pending groups flushed", flushed);
            }
            NetworkUnit::Control {
                kind: ControlKind::Bye,
                ..
            } => {
                tracing::info!("Controller {} said goodbye", from);
                self.groups.clear();
                self.controller = None;
            }
            other => tracing::debug!("Ignoring unexpected {:?} unit", other.kind()),
        }
    }

    fn on_unit(&mut self, unit: GroupUnit, now: u64) {
        self.stats.units_received += 1;
        if self.finished.contains_key(&unit.group_id) || now > unit.presentation_ts {
            self.stats.units_late += 1;
            return;
        }

        let group_id = unit.group_id;
        let group = self
            .groups
            .entry(group_id)
            .or_insert_with(|| PendingGroup::new(&unit));
        if group.data_units != unit.data_units || group.redundancy != unit.redundancy {
            self.stats.inconsistent_units += 1;
            return;
        }
        let slot = &mut group.slots[unit.index as usize];
        if slot.is_some() {
            self.stats.duplicates += 1;
            return;
        }
        *slot = Some(unit.payload);
        group.received += 1;

        if !group.delivered && group.received >= group.data_units as u16 {
            self.deliver(group_id);
        }
        if self
            .groups
            .get(&group_id)
            .is_some_and(|g| g.received == g.total())
        {
            self.finish(group_id);
        }
    }

    fn deliver(&mut self, group_id: u32) {
        let Some(group) = self.groups.get_mut(&group_id) else {
            return;
        };
        let chunks = match self.codec.decode(&group.slots, group.data_units, group.redundancy) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("Group {} failed to decode: {}", group_id, e);
                return;
            }
        };
        group.delivered = true;
        let recovered = group.slots[..group.data_units as usize]
            .iter()
            .any(Option::is_none);

        let mut pcm_bytes = BytesMut::new();
        for chunk in &chunks {
            pcm_bytes.extend_from_slice(chunk);
        }
        let frame = ReceivedFrame {
            group_id,
            deadline: group.deadline,
            samples: pcm::decode_s16le(&pcm_bytes),
            channels: self.channels,
            recovered,
        };

        self.stats.frames_delivered += 1;
        if recovered {
            self.stats.frames_recovered += 1;
        }
        match self.delivery.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.delivery_overflow += 1;
                tracing::debug!("Delivery queue full, frame {} dropped", group_id);
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("Delivery receiver gone, frame {} dropped", group_id);
            }
        }
    }

    /// Acknowledge and forget a group
    fn finish(&mut self, group_id: u32) {
        let Some(group) = self.groups.remove(&group_id) else {
            return;
        };
        self.finished.insert(group_id, group.deadline);
        if !group.delivered {
            self.stats.groups_lost += 1;
            tracing::debug!(
                "Group {} lost: {} of {} units, {} needed",
                group_id,
                group.received,
                group.total(),
                group.data_units
            );
        }

        let Some(controller) = self.controller else {
            return;
        };
        let ack = GroupAck {
            group_id,
            received: group.received,
            total: group.total(),
            recovered: group.delivered,
        };
        match ack.to_unit() {
            Ok(unit) => {
                self.send(unit, controller);
                self.stats.acks_sent += 1;
            }
            Err(e) => tracing::warn!("Cannot encode ack: {}", e),
        }
    }

    /// Acknowledge groups whose deadline has passed and forget old ones
    pub fn poll(&mut self, now: u64) {
        let due: Vec<u32> = self
            .groups
            .iter()
            .filter(|(_, g)| g.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for group_id in due {
            self.finish(group_id);
        }
        self.finished
            .retain(|_, deadline| now <= deadline.saturating_add(FINISHED_RETENTION_US));
    }

    /// Tell the controller this speaker is leaving
    pub fn shutdown(&mut self) {
        if let Some(controller) = self.controller.take() {
            self.send(NetworkUnit::control(ControlKind::Bye), controller);
            tracing::info!("Sent goodbye to {}", controller);
        }
        self.groups.clear();
    }
}

/// [`InboundSink`] wrapper stamping packets with the endpoint's own clock
pub struct EndpointSink {
    endpoint: Mutex<SpeakerEndpoint>,
    clock: SharedClock,
}

impl EndpointSink {
    pub fn new(endpoint: SpeakerEndpoint, clock: SharedClock) -> Self {
        Self {
            endpoint: Mutex::new(endpoint),
            clock,
        }
    }

    pub fn poll(&self) {
        let now = self.clock.now_us();
        self.endpoint.lock().poll(now);
    }

    pub fn stats(&self) -> EndpointStats {
        self.endpoint.lock().stats().clone()
    }

    pub fn shutdown(&self) {
        self.endpoint.lock().shutdown();
    }
}

impl InboundSink for EndpointSink {
    fn deliver(&self, packet: Packet, from: SocketAddr) {
        let now = self.clock.now_us();
        self.endpoint.lock().handle_packet(packet, from, now);
    }
}
