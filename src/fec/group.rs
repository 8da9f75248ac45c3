//! Outstanding FEC groups on the sending side

use std::collections::BTreeMap;

/// A group of `k` data plus `r` redundancy units sent for one frame.
/// Its redundancy is fixed when it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecGroup {
    pub id: u32,
    pub data_units: u8,
    pub redundancy: u8,
    /// Presentation timestamp (controller clock) of the frame it carries
    pub pts: u64,
    pub created_at: u64,
    /// Written off as lost if not acknowledged by then
    pub expires_at: u64,
}

impl FecGroup {
    pub fn total_units(&self) -> u16 {
        self.data_units as u16 + self.redundancy as u16
    }
}

/// Tracks groups until they are acknowledged or expire.
///
/// Group ids wrap, but an id is never handed out while a group holding it is
/// still outstanding.
#[derive(Debug, Default)]
pub struct GroupLedger {
    next_id: u32,
    outstanding: BTreeMap<u32, FecGroup>,
}

impl GroupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and start tracking a new group
    pub fn open(&mut self, data_units: u8, redundancy: u8, pts: u64, now: u64, grace_us: u64) -> FecGroup {
        let mut id = self.next_id;
        while self.outstanding.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);

        let group = FecGroup {
            id,
            data_units,
            redundancy,
            pts,
            created_at: now,
            expires_at: pts.max(now).saturating_add(grace_us),
        };
        self.outstanding.insert(id, group.clone());
        group
    }

    /// Stop tracking an acknowledged group
    pub fn acknowledge(&mut self, id: u32) -> Option<FecGroup> {
        self.outstanding.remove(&id)
    }

    /// Remove and return every group whose expiry has passed
    pub fn expire(&mut self, now: u64) -> Vec<FecGroup> {
        let expired: Vec<u32> = self
            .outstanding
            .values()
            .filter(|g| g.expires_at <= now)
            .map(|g| g.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.outstanding.remove(&id))
            .collect()
    }

    /// Discard everything; returns how many groups were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.outstanding.len();
        self.outstanding.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    #[cfg(test)]
    fn set_next_id(&mut self, id: u32) {
        self.next_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_acknowledge() {
        let mut ledger = GroupLedger::new();
        let a = ledger.open(4, 2, 50_000, 10_000, 500_000);
        let b = ledger.open(4, 3, 60_000, 20_000, 500_000);

        assert_ne!(a.id, b.id);
        assert_eq!(a.total_units(), 6);
        assert_eq!(a.expires_at, 550_000);
        assert_eq!(ledger.len(), 2);

        assert_eq!(ledger.acknowledge(a.id), Some(a.clone()));
        assert_eq!(ledger.acknowledge(a.id), None);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_expire() {
        let mut ledger = GroupLedger::new();
        ledger.open(4, 2, 100, 0, 1_000);
        ledger.open(4, 2, 5_000, 0, 1_000);

        assert!(ledger.expire(1_099).is_empty());
        let expired = ledger.expire(1_100);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].pts, 100);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_wrapping_ids_skip_outstanding() {
        let mut ledger = GroupLedger::new();
        ledger.set_next_id(u32::MAX);
        let a = ledger.open(1, 1, 0, 0, 1_000_000);
        assert_eq!(a.id, u32::MAX);

        let b = ledger.open(1, 1, 0, 0, 1_000_000);
        assert_eq!(b.id, 0);

        // Wrap around onto a live id: it must be skipped
        ledger.set_next_id(u32::MAX);
        let c = ledger.open(1, 1, 0, 0, 1_000_000);
        assert_eq!(c.id, 1);
    }

    #[test]
    fn test_clear() {
        let mut ledger = GroupLedger::new();
        ledger.open(2, 1, 0, 0, 10);
        ledger.open(2, 1, 0, 0, 10);
        assert_eq!(ledger.clear(), 2);
        assert!(ledger.is_empty());
    }
}
