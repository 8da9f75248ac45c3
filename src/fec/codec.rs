//! Systematic Cauchy Reed-Solomon erasure codec
//!
//! Data units pass through untouched. Redundancy unit `p` is
//! `sum_j C[p][j] * shard_j` where `C[p][j] = 1 / ((k + p) ^ j)` and
//! `shard_j` is data unit `j` prefixed with its length and zero padded to the
//! longest unit. Every square submatrix of `[I; C]` is invertible, so any `k`
//! received units determine the group.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::MAX_GROUP_UNITS;
use crate::error::FecError;
use crate::fec::gf256;

const LEN_PREFIX: usize = 2;

/// Erasure codec with per-instance statistics
#[derive(Debug, Default)]
pub struct FecCodec {
    groups_encoded: u64,
    groups_decoded: u64,
    groups_recovered: u64,
    groups_unrecoverable: u64,
}

impl FecCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protect `data` with `redundancy` extra units.
    ///
    /// Returns `data.len() + redundancy` units; the first `data.len()` are the
    /// inputs unchanged.
    pub fn encode(&mut self, data: &[Bytes], redundancy: u8) -> Result<Vec<Bytes>, FecError> {
        let k = data.len();
        let r = redundancy as usize;
        check_shape(k, r)?;

        let longest = data.iter().map(Bytes::len).max().unwrap_or(0);
        if longest > u16::MAX as usize {
            return Err(FecError::InvalidGroup(format!("unit of {} bytes", longest)));
        }
        let shard_len = longest + LEN_PREFIX;
        let shards: Vec<Vec<u8>> = data.iter().map(|unit| pad(unit, shard_len)).collect();

        let mut out = Vec::with_capacity(k + r);
        out.extend(data.iter().cloned());
        for p in 0..r {
            let mut parity = vec![0u8; shard_len];
            for (j, shard) in shards.iter().enumerate() {
                gf256::mul_acc(&mut parity, shard, coefficient(k, p, j));
            }
            out.push(Bytes::from(parity));
        }

        self.groups_encoded += 1;
        Ok(out)
    }

    /// Reconstruct the `k` data units of a group.
    ///
    /// `received` holds one slot per unit index (`k + r` slots), `None` for
    /// units that never arrived. Fails with [`FecError::Unrecoverable`] when
    /// fewer than `k` units are present.
    pub fn decode(&mut self, received: &[Option<Bytes>], k: u8, r: u8) -> Result<Vec<Bytes>, FecError> {
        let (k, r) = (k as usize, r as usize);
        check_shape(k, r)?;
        if received.len() != k + r {
            return Err(FecError::InvalidGroup(format!(
                "expected {} slots, got {}",
                k + r,
                received.len()
            )));
        }

        let present = received.iter().filter(|slot| slot.is_some()).count();
        if present < k {
            self.groups_unrecoverable += 1;
            return Err(FecError::Unrecoverable {
                received: present,
                required: k,
            });
        }

        self.groups_decoded += 1;
        if received[..k].iter().all(Option::is_some) {
            return Ok(received[..k].iter().flatten().cloned().collect());
        }

        let mut shard_len = None;
        for parity in received[k..].iter().flatten() {
            match shard_len {
                None => shard_len = Some(parity.len()),
                Some(len) if len != parity.len() => return Err(FecError::InconsistentShards),
                Some(_) => {}
            }
        }
        // A data unit is missing, so at least one parity unit is present
        let shard_len = shard_len.ok_or(FecError::InconsistentShards)?;
        if shard_len < LEN_PREFIX {
            return Err(FecError::InconsistentShards);
        }

        let chosen: Vec<usize> = (0..k + r).filter(|&i| received[i].is_some()).take(k).collect();
        let mut matrix = Vec::with_capacity(k);
        let mut shards = Vec::with_capacity(k);
        for &index in &chosen {
            let Some(unit) = received[index].as_ref() else {
                continue;
            };
            if index < k {
                if unit.len() + LEN_PREFIX > shard_len {
                    return Err(FecError::InconsistentShards);
                }
                let mut row = vec![0u8; k];
                row[index] = 1;
                matrix.push(row);
                shards.push(pad(unit, shard_len));
            } else {
                matrix.push((0..k).map(|j| coefficient(k, index - k, j)).collect());
                shards.push(unit.to_vec());
            }
        }

        let inverse = gf256::invert(&matrix)
            .ok_or_else(|| FecError::InvalidGroup("singular decode matrix".into()))?;

        let mut out = Vec::with_capacity(k);
        for (index, slot) in received[..k].iter().enumerate() {
            if let Some(unit) = slot {
                out.push(unit.clone());
                continue;
            }
            let mut buf = vec![0u8; shard_len];
            for (col, shard) in shards.iter().enumerate() {
                gf256::mul_acc(&mut buf, shard, inverse[index][col]);
            }
            let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            if len + LEN_PREFIX > shard_len {
                return Err(FecError::InconsistentShards);
            }
            out.push(Bytes::copy_from_slice(&buf[LEN_PREFIX..LEN_PREFIX + len]));
        }

        self.groups_recovered += 1;
        Ok(out)
    }

    /// Get statistics
    pub fn stats(&self) -> FecStats {
        FecStats {
            groups_encoded: self.groups_encoded,
            groups_decoded: self.groups_decoded,
            groups_recovered: self.groups_recovered,
            groups_unrecoverable: self.groups_unrecoverable,
        }
    }
}

/// Codec statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FecStats {
    pub groups_encoded: u64,
    pub groups_decoded: u64,
    /// Decoded groups that needed redundancy units
    pub groups_recovered: u64,
    pub groups_unrecoverable: u64,
}

fn check_shape(k: usize, r: usize) -> Result<(), FecError> {
    if k == 0 {
        return Err(FecError::InvalidGroup("group has no data units".into()));
    }
    if k + r > MAX_GROUP_UNITS {
        return Err(FecError::InvalidGroup(format!(
            "{} units exceed the limit of {}",
            k + r,
            MAX_GROUP_UNITS
        )));
    }
    Ok(())
}

/// Cauchy coefficient for parity row `p`, data column `j`
fn coefficient(k: usize, p: usize, j: usize) -> u8 {
    gf256::inv(((k + p) as u8) ^ (j as u8))
}

fn pad(unit: &[u8], shard_len: usize) -> Vec<u8> {
    let mut shard = BytesMut::with_capacity(shard_len);
    shard.put_u16(unit.len() as u16);
    shard.put_slice(unit);
    shard.resize(shard_len, 0);
    shard.to_vec()
}
