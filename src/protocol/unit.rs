//! Network unit definitions

use bytes::Bytes;

use crate::error::FrameError;
use crate::protocol::control::ControlKind;

/// Unit kind tag on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitKind {
    Audio = 1,
    Redundancy = 2,
    SyncProbe = 3,
    SyncReply = 4,
    Control = 5,
}

impl TryFrom<u8> for UnitKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Audio),
            2 => Ok(Self::Redundancy),
            3 => Ok(Self::SyncProbe),
            4 => Ok(Self::SyncReply),
            5 => Ok(Self::Control),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// One member of an FEC group: a data unit (`index < data_units`) or a
/// redundancy unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUnit {
    pub group_id: u32,
    pub index: u8,
    pub data_units: u8,
    pub redundancy: u8,
    /// Presentation deadline on the receiving endpoint's clock
    pub presentation_ts: u64,
    pub payload: Bytes,
}

impl GroupUnit {
    pub fn total_units(&self) -> usize {
        self.data_units as usize + self.redundancy as usize
    }

    pub fn is_data(&self) -> bool {
        self.index < self.data_units
    }
}

/// A decoded network unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkUnit {
    Audio(GroupUnit),
    Redundancy(GroupUnit),
    SyncProbe { probe_id: u32, send_ts: u64 },
    SyncReply { probe_id: u32, recv_ts: u64, send_ts: u64 },
    Control { kind: ControlKind, args: Bytes },
}

impl NetworkUnit {
    pub fn kind(&self) -> UnitKind {
        match self {
            NetworkUnit::Audio(_) => UnitKind::Audio,
            NetworkUnit::Redundancy(_) => UnitKind::Redundancy,
            NetworkUnit::SyncProbe { .. } => UnitKind::SyncProbe,
            NetworkUnit::SyncReply { .. } => UnitKind::SyncReply,
            NetworkUnit::Control { .. } => UnitKind::Control,
        }
    }

    /// Control unit without arguments
    pub fn control(kind: ControlKind) -> Self {
        NetworkUnit::Control {
            kind,
            args: Bytes::new(),
        }
    }
}

/// A unit together with the sender's sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub unit: NetworkUnit,
}
