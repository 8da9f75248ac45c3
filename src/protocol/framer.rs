//! Packet framing and parsing
//!
//! Parsing treats every datagram as untrusted: any inconsistency yields a
//! [`FrameError`] and never a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{MAX_GROUP_UNITS, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use crate::error::FrameError;
use crate::protocol::control::ControlKind;
use crate::protocol::unit::{GroupUnit, NetworkUnit, Packet, UnitKind};

/// len(2) + version(1) + kind(1) + seq(4)
pub const HEADER_LEN: usize = 8;
/// group_id(4) + index(1) + k(1) + r(1) + pts(8)
pub const GROUP_HEADER_LEN: usize = 15;
const SYNC_PROBE_LEN: usize = 12;
const SYNC_REPLY_LEN: usize = 20;
/// control kind(1) + args_len(2)
const CONTROL_HEADER_LEN: usize = 3;

/// Per-session framer; stamps outgoing units with increasing sequence numbers
#[derive(Debug, Default)]
pub struct PacketFramer {
    next_seq: u32,
    units_framed: u64,
    bytes_framed: u64,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering at `seq`
    pub fn with_initial_seq(seq: u32) -> Self {
        Self {
            next_seq: seq,
            ..Self::default()
        }
    }

    /// Frame a unit with the next sequence number
    pub fn frame(&mut self, unit: NetworkUnit) -> Result<Bytes, FrameError> {
        let packet = Packet {
            seq: self.next_seq,
            unit,
        };
        let bytes = Self::encode(&packet)?;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.units_framed += 1;
        self.bytes_framed += bytes.len() as u64;
        Ok(bytes)
    }

    /// Sequence number the next framed unit will carry
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn units_framed(&self) -> u64 {
        self.units_framed
    }

    pub fn bytes_framed(&self) -> u64 {
        self.bytes_framed
    }

    /// Encode a packet without touching any sequence state
    pub fn encode(packet: &Packet) -> Result<Bytes, FrameError> {
        let mut body = BytesMut::with_capacity(64);
        body.put_u8(PROTOCOL_VERSION);
        body.put_u8(packet.unit.kind() as u8);
        body.put_u32(packet.seq);

        match &packet.unit {
            NetworkUnit::Audio(unit) | NetworkUnit::Redundancy(unit) => {
                body.reserve(GROUP_HEADER_LEN + unit.payload.len());
                body.put_u32(unit.group_id);
                body.put_u8(unit.index);
                body.put_u8(unit.data_units);
                body.put_u8(unit.redundancy);
                body.put_u64(unit.presentation_ts);
                body.put_slice(&unit.payload);
            }
            NetworkUnit::SyncProbe { probe_id, send_ts } => {
                body.put_u32(*probe_id);
                body.put_u64(*send_ts);
            }
            NetworkUnit::SyncReply {
                probe_id,
                recv_ts,
                send_ts,
            } => {
                body.put_u32(*probe_id);
                body.put_u64(*recv_ts);
                body.put_u64(*send_ts);
            }
            NetworkUnit::Control { kind, args } => {
                if args.len() > u16::MAX as usize {
                    return Err(FrameError::TooLarge(args.len()));
                }
                body.put_u8(*kind as u8);
                body.put_u16(args.len() as u16);
                body.put_slice(args);
            }
        }

        let total = body.len() + 2;
        if total > MAX_PACKET_SIZE {
            return Err(FrameError::TooLarge(total));
        }
        let mut out = BytesMut::with_capacity(total);
        out.put_u16(body.len() as u16);
        out.put_slice(&body);
        Ok(out.freeze())
    }

    /// Parse one datagram
    pub fn parse(datagram: Bytes) -> Result<Packet, FrameError> {
        need(datagram.len(), HEADER_LEN)?;
        let declared = u16::from_be_bytes([datagram[0], datagram[1]]) as usize;
        let actual = datagram.len() - 2;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }

        let mut buf = datagram.slice(2..);
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let kind = UnitKind::try_from(buf.get_u8())?;
        let seq = buf.get_u32();

        let unit = match kind {
            UnitKind::Audio => NetworkUnit::Audio(parse_group_unit(buf, true)?),
            UnitKind::Redundancy => NetworkUnit::Redundancy(parse_group_unit(buf, false)?),
            UnitKind::SyncProbe => {
                exact(buf.remaining(), SYNC_PROBE_LEN)?;
                NetworkUnit::SyncProbe {
                    probe_id: buf.get_u32(),
                    send_ts: buf.get_u64(),
                }
            }
            UnitKind::SyncReply => {
                exact(buf.remaining(), SYNC_REPLY_LEN)?;
                NetworkUnit::SyncReply {
                    probe_id: buf.get_u32(),
                    recv_ts: buf.get_u64(),
                    send_ts: buf.get_u64(),
                }
            }
            UnitKind::Control => {
                need(buf.remaining(), CONTROL_HEADER_LEN)?;
                let kind = ControlKind::try_from(buf.get_u8())?;
                let args_len = buf.get_u16() as usize;
                exact(buf.remaining(), args_len)?;
                NetworkUnit::Control { kind, args: buf }
            }
        };

        Ok(Packet { seq, unit })
    }
}

fn parse_group_unit(mut buf: Bytes, data: bool) -> Result<GroupUnit, FrameError> {
    need(buf.remaining(), GROUP_HEADER_LEN)?;
    let group_id = buf.get_u32();
    let index = buf.get_u8();
    let data_units = buf.get_u8();
    let redundancy = buf.get_u8();
    let presentation_ts = buf.get_u64();

    if data_units == 0 {
        return Err(FrameError::InvalidField("data_units"));
    }
    if data_units as usize + redundancy as usize > MAX_GROUP_UNITS {
        return Err(FrameError::InvalidField("group size"));
    }
    let in_range = if data {
        index < data_units
    } else {
        index >= data_units && (index as usize) < data_units as usize + redundancy as usize
    };
    if !in_range {
        return Err(FrameError::InvalidField("index_in_group"));
    }

    Ok(GroupUnit {
        group_id,
        index,
        data_units,
        redundancy,
        presentation_ts,
        payload: buf,
    })
}

fn need(available: usize, needed: usize) -> Result<(), FrameError> {
    if available < needed {
        return Err(FrameError::Truncated { needed, available });
    }
    Ok(())
}

fn exact(available: usize, expected: usize) -> Result<(), FrameError> {
    need(available, expected)?;
    if available != expected {
        return Err(FrameError::InvalidField("trailing bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn audio(index: u8) -> NetworkUnit {
        NetworkUnit::Audio(GroupUnit {
            group_id: 0xdead_beef,
            index,
            data_units: 4,
            redundancy: 2,
            presentation_ts: 1_234_567_890,
            payload: Bytes::from_static(b"pcm-bytes"),
        })
    }

    #[test]
    fn test_frame_and_parse() {
        let mut framer = PacketFramer::new();
        let units = vec![
            audio(1),
            NetworkUnit::Redundancy(GroupUnit {
                group_id: 9,
                index: 5,
                data_units: 4,
                redundancy: 2,
                presentation_ts: 42,
                payload: Bytes::from_static(&[0, 1, 2]),
            }),
            NetworkUnit::SyncProbe {
                probe_id: 3,
                send_ts: 99,
            },
            NetworkUnit::SyncReply {
                probe_id: 3,
                recv_ts: 100,
                send_ts: 101,
            },
            NetworkUnit::control(ControlKind::Bye),
        ];

        for (i, unit) in units.into_iter().enumerate() {
            let bytes = framer.frame(unit.clone()).unwrap();
            let packet = PacketFramer::parse(bytes).unwrap();
            assert_eq!(packet.seq, i as u32);
            assert_eq!(packet.unit, unit);
        }
        assert_eq!(framer.units_framed(), 5);
    }

    #[test]
    fn test_header_layout() {
        let bytes = PacketFramer::encode(&Packet {
            seq: 0x0102_0304,
            unit: NetworkUnit::SyncProbe {
                probe_id: 7,
                send_ts: 8,
            },
        })
        .unwrap();

        assert_eq!(bytes.len(), HEADER_LEN + 12);
        assert_eq!(&bytes[..8], &[0, 18, PROTOCOL_VERSION, UnitKind::SyncProbe as u8, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut framer = PacketFramer::with_initial_seq(u32::MAX);
        framer.frame(NetworkUnit::control(ControlKind::Bye)).unwrap();
        assert_eq!(framer.next_seq(), 0);
    }

    #[test]
    fn test_rejects_truncated() {
        let bytes = PacketFramer::encode(&Packet { seq: 1, unit: audio(0) }).unwrap();
        assert!(matches!(
            PacketFramer::parse(bytes.slice(..5)),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            PacketFramer::parse(bytes.slice(..bytes.len() - 1)),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_header() {
        let bytes = PacketFramer::encode(&Packet { seq: 1, unit: audio(0) }).unwrap();

        let mut wrong_version = bytes.to_vec();
        wrong_version[2] = 9;
        assert_eq!(
            PacketFramer::parse(Bytes::from(wrong_version)),
            Err(FrameError::UnsupportedVersion(9))
        );

        let mut wrong_kind = bytes.to_vec();
        wrong_kind[3] = 42;
        assert_eq!(PacketFramer::parse(Bytes::from(wrong_kind)), Err(FrameError::UnknownKind(42)));
    }

    #[test]
    fn test_rejects_kind_mismatch() {
        // A redundancy index inside an audio unit
        let bytes = PacketFramer::encode(&Packet { seq: 1, unit: audio(5) }).unwrap();
        assert_eq!(
            PacketFramer::parse(bytes),
            Err(FrameError::InvalidField("index_in_group"))
        );

        // Sync probe body relabelled as a reply
        let probe = PacketFramer::encode(&Packet {
            seq: 1,
            unit: NetworkUnit::SyncProbe {
                probe_id: 1,
                send_ts: 2,
            },
        })
        .unwrap();
        let mut relabelled = probe.to_vec();
        relabelled[3] = UnitKind::SyncReply as u8;
        assert!(matches!(
            PacketFramer::parse(Bytes::from(relabelled)),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_control_length_mismatch() {
        let bytes = PacketFramer::encode(&Packet {
            seq: 1,
            unit: NetworkUnit::Control {
                kind: ControlKind::Ack,
                args: Bytes::from_static(&[1, 2, 3, 4]),
            },
        })
        .unwrap();
        let mut tampered = bytes.to_vec();
        // args_len sits right after the control kind
        tampered[10] = 9;
        assert!(PacketFramer::parse(Bytes::from(tampered)).is_err());
    }

    #[test]
    fn test_rejects_oversized() {
        let unit = NetworkUnit::Audio(GroupUnit {
            group_id: 1,
            index: 0,
            data_units: 1,
            redundancy: 0,
            presentation_ts: 0,
            payload: Bytes::from(vec![0u8; MAX_PACKET_SIZE]),
        });
        assert!(matches!(
            PacketFramer::new().frame(unit),
            Err(FrameError::TooLarge(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = PacketFramer::parse(Bytes::from(data));
        }

        #[test]
        fn prop_parse_never_panics_with_valid_length(mut data in prop::collection::vec(any::<u8>(), 2..128)) {
            let len = (data.len() - 2) as u16;
            data[0..2].copy_from_slice(&len.to_be_bytes());
            let _ = PacketFramer::parse(Bytes::from(data));
        }
    }
}
