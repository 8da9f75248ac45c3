//! Deterministic discrete-event network simulation shared by the
//! integration tests.
//!
//! Controller-side sessions and speaker endpoints are stepped by hand on a
//! simulated timeline. Each speaker has its own clock (offset and drift) and
//! its own lossy, jittery link.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Receiver;

use lan_speaker_sync::audio::{AudioFrame, StampedFrame};
use lan_speaker_sync::config::AppConfig;
use lan_speaker_sync::endpoint::{ReceivedFrame, SpeakerEndpoint};
use lan_speaker_sync::network::MemoryTransport;
use lan_speaker_sync::protocol::{NetworkUnit, Packet, PacketFramer};
use lan_speaker_sync::scheduler::{compute_lookahead, next_presentation_ts};
use lan_speaker_sync::session::{Endpoint, SessionState, SpeakerSession};

pub const CONTROLLER_ADDR: &str = "10.0.0.1:5000";
/// Simulated time starts here so that endpoints behind the controller still
/// have positive clocks
pub const SIM_START_US: u64 = 10_000_000;

/// xorshift64, good enough for repeatable noise
#[derive(Debug, Clone)]
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    /// Uniform in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            self.next_u64() % bound
        }
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// One direction-aware network path
#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub one_way_us: u64,
    /// Uniform extra delay in [0, jitter)
    pub jitter_us: u64,
    /// Loss controller -> speaker
    pub loss_forward: f64,
    /// Loss speaker -> controller
    pub loss_reverse: f64,
}

impl Link {
    pub fn clean(one_way_us: u64) -> Self {
        Self {
            one_way_us,
            jitter_us: 0,
            loss_forward: 0.0,
            loss_reverse: 0.0,
        }
    }

    pub fn dead() -> Self {
        Self {
            one_way_us: 0,
            jitter_us: 0,
            loss_forward: 1.0,
            loss_reverse: 1.0,
        }
    }
}

/// A speaker's clock: `local = global * (1 + drift) + offset`
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    pub offset_us: i64,
    pub drift_ppm: f64,
}

impl SimClock {
    pub fn local(&self, global: u64) -> u64 {
        let drifted = global as f64 * (1.0 + self.drift_ppm * 1e-6);
        (drifted.round() as i64 + self.offset_us).max(0) as u64
    }
}

pub struct SimSpeaker {
    pub addr: SocketAddr,
    pub clock: SimClock,
    pub link: Link,
    pub endpoint: SpeakerEndpoint,
    pub frames: Receiver<ReceivedFrame>,
    pub outbound: Arc<MemoryTransport>,
    /// Frames handed to the playout side so far
    pub delivered: Vec<ReceivedFrame>,
}

enum Flight {
    ToSpeaker(usize, Bytes),
    ToController(usize, Bytes),
}

/// Controller sessions plus simulated speakers on one timeline
pub struct Simulation {
    pub now: u64,
    pub config: AppConfig,
    pub rng: Rng,
    pub controller_out: Arc<MemoryTransport>,
    pub sessions: Vec<SpeakerSession>,
    pub speakers: Vec<SimSpeaker>,
    in_flight: BTreeMap<(u64, u64), Flight>,
    flight_seq: u64,
    last_pts: Option<u64>,
    controller: SocketAddr,
}

impl Simulation {
    pub fn new(config: AppConfig, seed: u64) -> Self {
        Self {
            now: SIM_START_US,
            config,
            rng: Rng::new(seed),
            controller_out: MemoryTransport::shared(),
            sessions: Vec::new(),
            speakers: Vec::new(),
            in_flight: BTreeMap::new(),
            flight_seq: 0,
            last_pts: None,
            controller: CONTROLLER_ADDR.parse().unwrap(),
        }
    }

    /// Add a speaker; returns its index in `sessions`/`speakers`
    pub fn add_speaker(&mut self, clock: SimClock, link: Link) -> usize {
        let index = self.speakers.len();
        let addr: SocketAddr = format!("10.0.1.{}:5001", index + 10).parse().unwrap();

        let endpoint = Endpoint::new(addr, vec![0, 1]);
        self.sessions.push(SpeakerSession::new(
            endpoint,
            &self.config,
            self.controller_out.clone(),
            self.now,
        ));

        let outbound = MemoryTransport::shared();
        let (endpoint, frames) = SpeakerEndpoint::new(&self.config.endpoint, outbound.clone());
        self.speakers.push(SimSpeaker {
            addr,
            clock,
            link,
            endpoint,
            frames,
            outbound,
            delivered: Vec::new(),
        });
        index
    }

    fn schedule(&mut self, at: u64, flight: Flight) {
        self.flight_seq += 1;
        self.in_flight.insert((at, self.flight_seq), flight);
    }

    fn delay(&mut self, link: &Link) -> u64 {
        link.one_way_us + self.rng.below(link.jitter_us)
    }

    /// Put everything the controller sent onto the wire
    fn route_controller(&mut self, sent_at: u64) {
        for (addr, datagram) in self.controller_out.take() {
            let Some(index) = self.speakers.iter().position(|s| s.addr == addr) else {
                continue;
            };
            let link = self.speakers[index].link;
            if self.rng.chance(link.loss_forward) {
                continue;
            }
            let at = sent_at + self.delay(&link);
            self.schedule(at, Flight::ToSpeaker(index, datagram));
        }
    }

    /// Put everything speaker `index` sent onto the wire
    fn route_speaker(&mut self, index: usize, sent_at: u64) {
        let link = self.speakers[index].link;
        for (_, datagram) in self.speakers[index].outbound.take() {
            if self.rng.chance(link.loss_reverse) {
                continue;
            }
            let at = sent_at + self.delay(&link);
            self.schedule(at, Flight::ToController(index, datagram));
        }
    }

    fn deliver_due(&mut self) {
        loop {
            let Some((&(at, seq), _)) = self.in_flight.iter().next() else {
                return;
            };
            if at > self.now {
                return;
            }
            let Some(flight) = self.in_flight.remove(&(at, seq)) else {
                return;
            };
            match flight {
                Flight::ToSpeaker(index, datagram) => {
                    let local = self.speakers[index].clock.local(at);
                    let controller = self.controller;
                    self.speakers[index]
                        .endpoint
                        .handle_datagram(datagram, controller, local);
                    self.route_speaker(index, at);
                }
                Flight::ToController(index, datagram) => {
                    if let Ok(packet) = PacketFramer::parse(datagram) {
                        self.sessions[index].on_packet(packet, at);
                    }
                }
            }
        }
    }

    /// One simulation step of `step_us`
    pub fn step(&mut self, step_us: u64) {
        self.deliver_due();

        for session in &mut self.sessions {
            session.poll(self.now);
        }
        self.route_controller(self.now);

        for index in 0..self.speakers.len() {
            let local = self.speakers[index].clock.local(self.now);
            self.speakers[index].endpoint.poll(local);
            self.route_speaker(index, self.now);
            let speaker = &mut self.speakers[index];
            speaker.delivered.extend(speaker.frames.try_iter());
        }

        self.now += step_us;
    }

    /// Step in 1ms increments for `duration_us`
    pub fn run_for(&mut self, duration_us: u64) {
        let end = self.now + duration_us;
        while self.now < end {
            self.step(1_000);
        }
    }

    /// Step until every session is in `state`, or panic after `limit_us`
    pub fn run_until_all(&mut self, state: SessionState, limit_us: u64) {
        let end = self.now + limit_us;
        while self.sessions.iter().any(|s| s.state() != state) {
            assert!(self.now < end, "sessions stuck: {:?}", self.states());
            self.step(1_000);
        }
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.sessions.iter().map(|s| s.state()).collect()
    }

    /// What the fleet scheduler does for one frame, on the simulated clock
    pub fn submit(&mut self, frame: Arc<AudioFrame>) -> u64 {
        let factor = self.config.scheduler.rtt_variance_factor;
        let delays: Vec<u64> = self
            .sessions
            .iter()
            .filter(|s| s.state().counts_for_lookahead())
            .filter_map(|s| s.stats().network_delay_us(factor))
            .collect();
        let lookahead = compute_lookahead(delays, &self.config.scheduler);
        let pts = next_presentation_ts(self.now, lookahead, self.last_pts);
        self.last_pts = Some(pts);

        let stamped = StampedFrame { pts, frame };
        for session in &mut self.sessions {
            if session.is_admitted() {
                let _ = session.on_frame(&stamped, self.now);
            }
        }
        self.route_controller(self.now);
        pts
    }

    /// Stream `frames` frames at `period_us`, stepping 1ms at a time
    pub fn stream(&mut self, frame: &Arc<AudioFrame>, frames: usize, period_us: u64) {
        for _ in 0..frames {
            self.submit(frame.clone());
            let end = self.now + period_us;
            while self.now < end {
                self.step(1_000);
            }
        }
    }
}

/// Ten milliseconds of stereo audio at 48 kHz
pub fn test_frame() -> Arc<AudioFrame> {
    let samples = (0..960).map(|i| ((i % 96) as f32 / 96.0) - 0.5).collect();
    Arc::new(AudioFrame::new(samples, 2, 48_000, 0, 0))
}

/// Synchronise a lone session against a perfectly regular endpoint, without
/// any transport in between. Returns the controller time reached.
pub fn sync_session(
    session: &mut SpeakerSession,
    transport: &MemoryTransport,
    clock: SimClock,
    one_way_us: u64,
    start: u64,
) -> u64 {
    let addr = session.endpoint().address;
    let probe_interval = AppConfig::default().clock.probe_interval_us();
    let mut now = start;
    let mut reply_seq = 0u32;

    while session.state() != SessionState::Ready {
        assert!(now < start + 30_000_000, "session never synchronised");
        session.poll(now);
        for datagram in transport.take_for(addr) {
            let packet = PacketFramer::parse(datagram).unwrap();
            if let NetworkUnit::SyncProbe { probe_id, send_ts } = packet.unit {
                let arrival = send_ts + one_way_us;
                let reply = Packet {
                    seq: reply_seq,
                    unit: NetworkUnit::SyncReply {
                        probe_id,
                        recv_ts: clock.local(arrival),
                        send_ts: clock.local(arrival + 20),
                    },
                };
                reply_seq += 1;
                session.on_packet(reply, arrival + 20 + one_way_us);
            }
        }
        now += probe_interval;
    }
    now
}
