//! Wire protocol between controller and speakers
//!
//! Every datagram is one length-prefixed, kind-tagged, sequenced unit:
//!
//! ```text
//! ┌────────┬─────────┬──────┬──────────┬──────────────────────────┐
//! │ len:16 │ version │ kind │  seq:32  │ body (kind specific)     │
//! └────────┴─────────┴──────┴──────────┴──────────────────────────┘
//! ```
//!
//! All integers are big-endian. Timestamps are microseconds since the
//! sender's clock epoch.

pub mod control;
pub mod framer;
pub mod sequence;
pub mod unit;

pub use control::{ControlKind, GroupAck};
pub use framer::PacketFramer;
pub use sequence::{seq_newer, SeqVerdict, SequenceTracker};
pub use unit::{GroupUnit, NetworkUnit, Packet, UnitKind};
