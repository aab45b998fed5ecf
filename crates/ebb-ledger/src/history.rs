//! Ledger storage: global history, slope-change schedule, per-account history.
//!
//! Histories are append-only. The only in-place write allowed is to the
//! entry at the current epoch while a checkpoint is finalizing it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use ebb_core::address::Address;
use ebb_core::constants::MAX_BISECTION_STEPS;
use ebb_core::types::{BlockInfo, Point};

/// Greatest index in `[0, max]` for which `le(index)` holds, assuming `le`
/// is monotone (true then false) and holds at 0.
///
/// Ascending-midpoint bisection bounded to [`MAX_BISECTION_STEPS`] rounds.
pub(crate) fn bisect(max: u64, le: impl Fn(u64) -> bool) -> u64 {
    let mut lo = 0u64;
    let mut hi = max;
    for _ in 0..MAX_BISECTION_STEPS {
        if lo >= hi {
            break;
        }
        let mid = lo + (hi - lo).div_ceil(2);
        if le(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Aggregate voting-power history, one point per epoch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct GlobalHistory {
    /// Current epoch. `points[epoch]` is the latest point.
    epoch: u64,
    points: Vec<Point>,
}

impl GlobalHistory {
    /// Create a history seeded with an empty point at `seed`.
    pub fn new(seed: BlockInfo) -> Self {
        Self {
            epoch: 0,
            points: vec![Point::anchor(seed)],
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Point recorded at `epoch`, if any.
    pub fn get(&self, epoch: u64) -> Option<&Point> {
        self.points.get(epoch as usize)
    }

    /// Latest point.
    pub fn last(&self) -> Point {
        self.points[self.epoch as usize]
    }

    /// Number of recorded points (`epoch + 1`).
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false: the seed point is recorded at construction.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Record `point` at `epoch`, appending if `epoch` is one past the end
    /// and overwriting otherwise.
    pub(crate) fn write(&mut self, epoch: u64, point: Point) {
        let idx = epoch as usize;
        debug_assert!(idx <= self.points.len(), "gap in global history at epoch {epoch}");
        if idx == self.points.len() {
            self.points.push(point);
        } else {
            self.points[idx] = point;
        }
    }

    /// Commit the epoch counter.
    pub(crate) fn set_epoch(&mut self, epoch: u64) {
        debug_assert!((epoch as usize) < self.points.len());
        self.epoch = epoch;
    }

    /// Greatest epoch `<= max_epoch` whose block height is `<= block`.
    ///
    /// Returns 0 when no later epoch qualifies, including blocks that predate
    /// the seed point.
    pub fn find_block_epoch(&self, block: u64, max_epoch: u64) -> u64 {
        bisect(max_epoch, |e| self.points[e as usize].blk <= block)
    }

    /// Greatest epoch `<= max_epoch` whose timestamp is `<= t`.
    pub fn find_timestamp_epoch(&self, t: u64, max_epoch: u64) -> u64 {
        bisect(max_epoch, |e| self.points[e as usize].ts <= t)
    }
}

/// Scheduled global slope changes keyed by week-aligned unlock time.
///
/// A value of `-s` at `t` means a combined slope of `s` stops decaying the
/// aggregate at `t`. Zero entries are not stored.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct SlopeSchedule(BTreeMap<u64, i128>);

impl SlopeSchedule {
    /// Scheduled change at `t`, 0 if none.
    pub fn at(&self, t: u64) -> i128 {
        self.0.get(&t).copied().unwrap_or(0)
    }

    /// Overwrite the scheduled change at `t`.
    pub(crate) fn set(&mut self, t: u64, d_slope: i128) {
        if d_slope == 0 {
            self.0.remove(&t);
        } else {
            self.0.insert(t, d_slope);
        }
    }

    /// Number of non-zero entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One account's voting-power history.
///
/// Index 0 is a zero sentinel meaning "no history"; real points start at 1.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UserHistory {
    points: Vec<Point>,
}

impl Default for UserHistory {
    fn default() -> Self {
        Self {
            points: vec![Point::default()],
        }
    }
}

impl UserHistory {
    /// Number of recorded points (the account's user epoch).
    pub fn epoch(&self) -> u64 {
        (self.points.len() - 1) as u64
    }

    /// Point at `idx`; index 0 is the zero sentinel.
    pub fn get(&self, idx: u64) -> Option<&Point> {
        self.points.get(idx as usize)
    }

    /// Latest point (the sentinel if nothing was recorded).
    pub fn last(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    pub(crate) fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Greatest index whose block height is `<= block`; 0 if none.
    pub fn find_block_index(&self, block: u64) -> u64 {
        bisect(self.epoch(), |i| self.points[i as usize].blk <= block)
    }

    /// Greatest index whose timestamp is `<= t`; 0 if none.
    pub fn find_timestamp_index(&self, t: u64) -> u64 {
        bisect(self.epoch(), |i| self.points[i as usize].ts <= t)
    }
}

/// Everything the checkpoint engine mutates and the query engine reads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct LedgerStore {
    pub(crate) global: GlobalHistory,
    pub(crate) slope_changes: SlopeSchedule,
    pub(crate) users: HashMap<Address, UserHistory>,
}

impl LedgerStore {
    /// Create a ledger whose global history is seeded at `seed`.
    pub fn new(seed: BlockInfo) -> Self {
        Self {
            global: GlobalHistory::new(seed),
            slope_changes: SlopeSchedule::default(),
            users: HashMap::new(),
        }
    }

    /// Aggregate history.
    pub fn global(&self) -> &GlobalHistory {
        &self.global
    }

    /// Slope-change schedule.
    pub fn slope_changes(&self) -> &SlopeSchedule {
        &self.slope_changes
    }

    /// History of `account`, if it ever checkpointed.
    pub fn user(&self, account: &Address) -> Option<&UserHistory> {
        self.users.get(account)
    }

    /// Number of points recorded for `account`.
    pub fn user_epoch(&self, account: &Address) -> u64 {
        self.users.get(account).map_or(0, UserHistory::epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: u64, blk: u64) -> Point {
        Point {
            bias: 0,
            slope: 0,
            ts,
            blk,
        }
    }

    #[test]
    fn bisect_finds_greatest_match() {
        let blocks = [0u64, 10, 20, 20, 30];
        let max = (blocks.len() - 1) as u64;
        assert_eq!(bisect(max, |i| blocks[i as usize] <= 0), 0);
        assert_eq!(bisect(max, |i| blocks[i as usize] <= 15), 1);
        assert_eq!(bisect(max, |i| blocks[i as usize] <= 20), 3);
        assert_eq!(bisect(max, |i| blocks[i as usize] <= 1_000), 4);
    }

    #[test]
    fn bisect_single_entry() {
        assert_eq!(bisect(0, |_| true), 0);
    }

    #[test]
    fn global_history_seeded() {
        let h = GlobalHistory::new(BlockInfo::new(100, 5));
        assert_eq!(h.epoch(), 0);
        assert_eq!(h.len(), 1);
        assert_eq!(h.last(), point(100, 5));
    }

    #[test]
    fn global_write_appends_then_overwrites() {
        let mut h = GlobalHistory::new(BlockInfo::new(0, 0));
        h.write(1, point(10, 1));
        h.set_epoch(1);
        assert_eq!(h.len(), 2);
        h.write(1, point(11, 2));
        assert_eq!(h.len(), 2);
        assert_eq!(h.last(), point(11, 2));
    }

    #[test]
    fn find_block_epoch_before_seed_is_zero() {
        let mut h = GlobalHistory::new(BlockInfo::new(100, 50));
        h.write(1, point(200, 60));
        h.set_epoch(1);
        assert_eq!(h.find_block_epoch(10, h.epoch()), 0);
        assert_eq!(h.find_block_epoch(59, h.epoch()), 0);
        assert_eq!(h.find_block_epoch(60, h.epoch()), 1);
        assert_eq!(h.find_timestamp_epoch(199, h.epoch()), 0);
        assert_eq!(h.find_timestamp_epoch(250, h.epoch()), 1);
    }

    #[test]
    fn schedule_drops_zero_entries() {
        let mut s = SlopeSchedule::default();
        s.set(100, -5);
        assert_eq!(s.at(100), -5);
        assert_eq!(s.len(), 1);
        s.set(100, 0);
        assert!(s.is_empty());
        assert_eq!(s.at(100), 0);
    }

    #[test]
    fn user_history_starts_with_sentinel() {
        let mut u = UserHistory::default();
        assert_eq!(u.epoch(), 0);
        assert_eq!(u.last(), Point::default());
        u.push(point(10, 1));
        u.push(point(20, 2));
        assert_eq!(u.epoch(), 2);
        assert_eq!(u.find_block_index(0), 0);
        assert_eq!(u.find_block_index(1), 1);
        assert_eq!(u.find_timestamp_index(25), 2);
    }

    #[test]
    fn store_bincode_round_trip() {
        let mut store = LedgerStore::new(BlockInfo::new(7, 3));
        store.slope_changes.set(604_800, -9);
        store
            .users
            .entry(Address([1; 20]))
            .or_default()
            .push(point(7, 3));
        let bytes = bincode::encode_to_vec(&store, bincode::config::standard()).unwrap();
        let (decoded, _): (LedgerStore, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded, store);
    }
}
