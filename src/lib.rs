//! # LAN Speaker Sync
//!
//! Sample-synchronized multi-channel audio transport to a fleet of wireless
//! speakers. Every speaker renders the same frame at the same instant even
//! though each has its own clock and its own lossy, jittery network path.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               CONTROLLER                                     │
//! │                                                                              │
//! │   upstream renderer ──► FleetScheduler::submit_frame ──► pts = now + lookahead│
//! │                               │   (registry keyed by EndpointId)            │
//! │              ┌────────────────┼─────────────────┬─────────────────┐         │
//! │              ▼                ▼                 ▼                 ▼         │
//! │      ┌──────────────┐ ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  │
//! │      │ Session task │ │ Session task │  │ Session task │  │ Session task │  │
//! │      │ ClockModel   │ │ ClockModel   │  │ ClockModel   │  │ ClockModel   │  │
//! │      │ FEC + Framer │ │ FEC + Framer │  │ FEC + Framer │  │ FEC + Framer │  │
//! │      └──────┬───────┘ └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  │
//! │             │  pts → endpoint-clock deadline     │                 │         │
//! │             ▼                ▼                   ▼                 ▼         │
//! │      ┌─────────────────────────────────────────────────────────────────┐    │
//! │      │        UDP transport (network::udp) - single socket             │    │
//! │      │  [len|ver|kind|seq| Audio / Redundancy / SyncProbe / Control ]  │    │
//! │      └─────────────────────────────────────────────────────────────────┘    │
//! │                ▲ inbound router: SyncReply / Ack routed by address          │
//! └────────────────┼────────────────────────────────────────────────────────────┘
//!                  │ UDP over WLAN
//!                  ▼
//! ┌────────────────────────────────────────────────────────────────────────────┐
//! │                           SPEAKER ENDPOINT                                  │
//! │   SyncProbe ──► SyncReply (endpoint clock)                                  │
//! │   Audio/Redundancy ──► FEC reassembly ──► PlayoutQueue (local deadline)     │
//! │   group complete / deadline ──► GroupAck                                    │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fec;
pub mod network;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod status;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default frame size in milliseconds
    pub const DEFAULT_FRAME_SIZE_MS: f32 = 10.0;

    /// Default UDP port of the controller
    pub const DEFAULT_CONTROLLER_PORT: u16 = 5000;

    /// Default UDP port of a speaker
    pub const DEFAULT_SPEAKER_PORT: u16 = 5001;

    /// Default endpoint jitter buffer depth in milliseconds
    pub const DEFAULT_JITTER_BUFFER_MS: u64 = 20;

    /// Maximum datagram size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Wire protocol version
    pub const PROTOCOL_VERSION: u8 = 1;

    /// Upper bound on k + r for one FEC group
    pub const MAX_GROUP_UNITS: usize = 255;

    /// Largest payload one audio/redundancy unit may carry
    pub const MAX_UNIT_PAYLOAD: usize = 1440;
}
