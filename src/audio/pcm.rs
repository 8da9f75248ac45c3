//! PCM packing for the wire
//!
//! Each endpoint receives only the channels in its channel map, as signed
//! 16-bit little-endian interleaved samples.

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::frame::AudioFrame;

/// Convert a float sample to i16 with clipping
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Pick `channel_map` out of `frame` and pack it as s16le.
///
/// An empty map selects every channel. Channels the frame does not have are
/// rendered as silence.
pub fn extract_s16le(frame: &AudioFrame, channel_map: &[u16]) -> Bytes {
    let channels = frame.channels as usize;
    let all: Vec<u16>;
    let map = if channel_map.is_empty() {
        all = (0..frame.channels).collect();
        &all[..]
    } else {
        channel_map
    };

    let mut out = BytesMut::with_capacity(frame.samples_per_channel() * map.len() * 2);
    if channels == 0 {
        return out.freeze();
    }
    for sample_frame in frame.samples.chunks_exact(channels) {
        for &channel in map {
            let value = sample_frame.get(channel as usize).copied().unwrap_or(0.0);
            out.put_i16_le(f32_to_i16(value));
        }
    }
    out.freeze()
}

/// Unpack s16le bytes into float samples; a trailing odd byte is ignored
pub fn decode_s16le(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}
