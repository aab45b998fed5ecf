//! Query engine: voting power by timestamp and by block height.
//!
//! Queries only read the ledger. Block-height lookups map a block to a
//! timestamp using the global history (interpolating between the two
//! surrounding epochs, or between the latest epoch and the current block),
//! then evaluate the relevant curve at that timestamp.

use ebb_core::address::Address;
use ebb_core::constants::{MAX_REPLAY_WEEKS, WEEK};
use ebb_core::curve::{decay, round_to_week};
use ebb_core::error::QueryError;
use ebb_core::types::{BlockInfo, Point};

use crate::history::LedgerStore;

impl LedgerStore {
    /// Voting power of `account` at timestamp `t`.
    ///
    /// Projects the latest point recorded at or before `t`. Returns 0 for
    /// accounts without history and for `t` before the first point.
    pub fn balance_of(&self, account: &Address, t: u64) -> u128 {
        let Some(history) = self.users.get(account) else {
            return 0;
        };
        let last = history.last();
        if t >= last.ts {
            return last.project(t);
        }
        let idx = history.find_timestamp_index(t);
        history.get(idx).map_or(0, |p| p.project(t))
    }

    /// Voting power of `account` at block height `block`.
    ///
    /// # Errors
    ///
    /// [`QueryError::FutureBlock`] if `block` is after `current.height`.
    pub fn balance_of_at(
        &self,
        account: &Address,
        block: u64,
        current: BlockInfo,
    ) -> Result<u128, QueryError> {
        check_block(block, current)?;
        let Some(history) = self.users.get(account) else {
            return Ok(0);
        };
        let idx = history.find_block_index(block);
        if idx == 0 {
            return Ok(0);
        }
        let Some(upoint) = history.get(idx) else {
            return Ok(0);
        };
        Ok(self
            .block_time(block, current)
            .map_or(0, |t| upoint.project(t)))
    }

    /// Aggregate voting power at timestamp `t`.
    ///
    /// Starts from the latest global point at or before `t` and replays
    /// scheduled slope changes up to `t` without writing anything.
    pub fn total_supply(&self, t: u64) -> u128 {
        let max_epoch = self.global.epoch();
        let latest = self.global.last();
        if t >= latest.ts {
            return self.supply_at(latest, t);
        }
        let epoch = self.global.find_timestamp_epoch(t, max_epoch);
        match self.global.get(epoch) {
            Some(point) if point.ts <= t => self.supply_at(*point, t),
            _ => 0,
        }
    }

    /// Aggregate voting power at block height `block`.
    ///
    /// # Errors
    ///
    /// [`QueryError::FutureBlock`] if `block` is after `current.height`.
    pub fn total_supply_at(&self, block: u64, current: BlockInfo) -> Result<u128, QueryError> {
        check_block(block, current)?;
        let epoch = self.global.find_block_epoch(block, self.global.epoch());
        let Some(point) = self.global.get(epoch) else {
            return Ok(0);
        };
        Ok(self
            .block_time(block, current)
            .map_or(0, |t| self.supply_at(*point, t)))
    }

    /// Estimate the timestamp of `block` from the global history.
    ///
    /// Returns `None` for blocks older than the seed point.
    pub fn block_time(&self, block: u64, current: BlockInfo) -> Option<u64> {
        let max_epoch = self.global.epoch();
        let epoch = self.global.find_block_epoch(block, max_epoch);
        let p0 = *self.global.get(epoch)?;
        if block < p0.blk {
            return None;
        }

        let (d_block, d_t) = match self.global.get(epoch + 1) {
            Some(p1) if epoch < max_epoch => (p1.blk - p0.blk, p1.ts - p0.ts),
            _ => (
                current.height.saturating_sub(p0.blk),
                current.timestamp.saturating_sub(p0.ts),
            ),
        };

        let mut t = p0.ts;
        if d_block != 0 {
            t += (u128::from(d_t) * u128::from(block - p0.blk) / u128::from(d_block)) as u64;
        }
        Some(t)
    }

    /// Project a global point to `t`, applying scheduled slope changes at
    /// each week boundary crossed.
    fn supply_at(&self, point: Point, t: u64) -> u128 {
        let mut last = point;
        let mut t_i = round_to_week(last.ts);
        for _ in 0..MAX_REPLAY_WEEKS {
            t_i += WEEK;
            let mut d_slope = 0i128;
            if t_i > t {
                t_i = t;
            } else {
                d_slope = self.slope_changes.at(t_i);
            }
            last.bias = decay(last.bias, last.slope, t_i.saturating_sub(last.ts));
            if t_i == t {
                break;
            }
            last.slope += d_slope;
            last.ts = t_i;
        }
        if last.bias > 0 { last.bias as u128 } else { 0 }
    }
}

fn check_block(block: u64, current: BlockInfo) -> Result<(), QueryError> {
    if block > current.height {
        return Err(QueryError::FutureBlock {
            requested: block,
            current: current.height,
        });
    }
    Ok(())
}
