//! Control units

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::protocol::unit::NetworkUnit;

/// Control unit sub-kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlKind {
    /// Endpoint → controller: delivery report for one FEC group
    Ack = 1,
    /// Controller → endpoint: stream withdrawn, flush pending groups
    Withdraw = 2,
    /// Either direction: leaving the session
    Bye = 3,
}

impl TryFrom<u8> for ControlKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Ack),
            2 => Ok(Self::Withdraw),
            3 => Ok(Self::Bye),
            other => Err(FrameError::UnknownControl(other)),
        }
    }
}

/// Arguments of an `Ack` control unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAck {
    pub group_id: u32,
    /// Units of the group that arrived
    pub received: u16,
    /// Units that were sent (k + r)
    pub total: u16,
    /// Whether the frame could be reconstructed
    pub recovered: bool,
}

impl GroupAck {
    pub fn to_unit(&self) -> Result<NetworkUnit, FrameError> {
        let args = bincode::serialize(self).map_err(|e| FrameError::ControlArgs(e.to_string()))?;
        Ok(NetworkUnit::Control {
            kind: ControlKind::Ack,
            args: Bytes::from(args),
        })
    }

    pub fn from_args(args: &[u8]) -> Result<Self, FrameError> {
        let ack: GroupAck =
            bincode::deserialize(args).map_err(|e| FrameError::ControlArgs(e.to_string()))?;
        if ack.received > ack.total || ack.total == 0 {
            return Err(FrameError::InvalidField("ack counts"));
        }
        Ok(ack)
    }

    /// Fraction of the group's units that were lost
    pub fn loss(&self) -> f32 {
        1.0 - self.received as f32 / self.total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_args() {
        let ack = GroupAck {
            group_id: 77,
            received: 5,
            total: 8,
            recovered: true,
        };
        let NetworkUnit::Control { kind, args } = ack.to_unit().unwrap() else {
            panic!("expected control unit");
        };
        assert_eq!(kind, ControlKind::Ack);
        assert_eq!(GroupAck::from_args(&args).unwrap(), ack);
        assert!((ack.loss() - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_ack_rejects_garbage() {
        assert!(GroupAck::from_args(&[1, 2]).is_err());

        let bogus = GroupAck {
            group_id: 1,
            received: 9,
            total: 4,
            recovered: true,
        };
        let args = bincode::serialize(&bogus).unwrap();
        assert_eq!(GroupAck::from_args(&args), Err(FrameError::InvalidField("ack counts")));
    }

    #[test]
    fn test_control_kind_codes() {
        assert_eq!(ControlKind::try_from(2), Ok(ControlKind::Withdraw));
        assert_eq!(ControlKind::try_from(9), Err(FrameError::UnknownControl(9)));
    }
}
