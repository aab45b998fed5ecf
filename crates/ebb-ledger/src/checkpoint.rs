//! Checkpoint engine.
//!
//! [`LedgerStore::checkpoint`] is the single writer of both histories and the
//! slope-change schedule. It has no failure modes of its own: callers
//! validate lock transitions before invoking it.

use tracing::{debug, warn};

use ebb_core::address::Address;
use ebb_core::constants::{BLOCK_SLOPE_PRECISION, MAX_REPLAY_WEEKS, WEEK};
use ebb_core::curve::{decay, round_to_week};
use ebb_core::types::{BlockInfo, LockedBalance, Point};

use crate::history::LedgerStore;

/// What a checkpoint call wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Epoch before the call.
    pub from_epoch: u64,
    /// Epoch after the call.
    pub to_epoch: u64,
    /// Weekly points appended by the replay (excludes the final point).
    pub weekly_points: u64,
    /// Whether the replay stopped at [`MAX_REPLAY_WEEKS`] before reaching
    /// the current timestamp.
    pub truncated: bool,
}

/// Result of replaying the global curve up to the current block.
struct Replay {
    point: Point,
    epoch: u64,
    weekly_points: u64,
    truncated: bool,
}

impl LedgerStore {
    /// Advance the global history to `now` and fold in one account's lock
    /// change from `old` to `new`.
    ///
    /// With `account == None` only the global history advances; `old` and
    /// `new` are ignored. With an account, exactly one point is appended to
    /// its history.
    ///
    /// `new.end`, if non-zero, must not be in the past, and `now` must not be
    /// behind the latest global point in either timestamp or height.
    pub fn checkpoint(
        &mut self,
        account: Option<&Address>,
        old: &LockedBalance,
        new: &LockedBalance,
        now: BlockInfo,
    ) -> CheckpointReport {
        let from_epoch = self.global.epoch();

        let mut u_old = Point::anchor(now);
        let mut u_new = Point::anchor(now);
        let mut old_dslope = 0i128;
        let mut new_dslope = 0i128;

        if account.is_some() {
            u_old = old.point_at(now);
            u_new = new.point_at(now);

            old_dslope = self.slope_changes.at(old.end);
            if new.end != 0 {
                new_dslope = if new.end == old.end {
                    old_dslope
                } else {
                    self.slope_changes.at(new.end)
                };
            }
        }

        let replay = self.replay_to(now);
        let mut last_point = replay.point;
        let epoch = replay.epoch;

        if account.is_some() {
            last_point.slope += u_new.slope - u_old.slope;
            last_point.bias += u_new.bias - u_old.bias;
            last_point.clamp();
        }
        self.global.write(epoch, last_point);
        self.global.set_epoch(epoch);

        if let Some(account) = account {
            let t = now.timestamp;
            if old.end > t {
                // The old expiry no longer applies to this lock's slope.
                old_dslope += u_old.slope;
                if new.end == old.end {
                    old_dslope -= u_new.slope;
                }
                self.slope_changes.set(old.end, old_dslope);
            }
            if new.end > t && new.end != old.end {
                new_dslope -= u_new.slope;
                self.slope_changes.set(new.end, new_dslope);
            }

            self.users.entry(*account).or_default().push(u_new);
        }

        if replay.truncated {
            warn!(
                epoch,
                reached = last_point.ts,
                now = now.timestamp,
                "checkpoint replay hit the weekly bound; history is stale until the next checkpoint"
            );
        }
        debug!(
            from_epoch,
            to_epoch = epoch,
            weekly_points = replay.weekly_points,
            bias = last_point.bias,
            slope = last_point.slope,
            account = ?account,
            "checkpoint"
        );

        CheckpointReport {
            from_epoch,
            to_epoch: epoch,
            weekly_points: replay.weekly_points,
            truncated: replay.truncated,
        }
    }

    /// Replay the global curve week by week from the latest point to `now`.
    ///
    /// Intermediate weekly points are appended as they are produced. The
    /// returned point is the one for the final epoch, not yet written.
    fn replay_to(&mut self, now: BlockInfo) -> Replay {
        let initial = self.global.last();
        let mut epoch = self.global.epoch();
        debug_assert!(now.timestamp >= initial.ts, "checkpoint time went backwards");

        if initial.ts == now.timestamp && initial.blk == now.height {
            return Replay {
                point: initial,
                epoch,
                weekly_points: 0,
                truncated: false,
            };
        }

        let block_slope: u128 = if now.timestamp > initial.ts {
            BLOCK_SLOPE_PRECISION * u128::from(now.height.saturating_sub(initial.blk))
                / u128::from(now.timestamp - initial.ts)
        } else {
            0
        };

        let mut last_point = initial;
        let mut t_i = round_to_week(initial.ts);
        let mut weekly_points = 0u64;
        let mut truncated = true;

        for _ in 0..MAX_REPLAY_WEEKS {
            t_i += WEEK;
            let mut d_slope = 0i128;
            if t_i > now.timestamp {
                t_i = now.timestamp;
            } else {
                d_slope = self.slope_changes.at(t_i);
            }

            last_point.bias = decay(last_point.bias, last_point.slope, t_i - last_point.ts);
            last_point.slope += d_slope;
            last_point.clamp();
            last_point.ts = t_i;
            last_point.blk = initial.blk
                + (block_slope * u128::from(t_i - initial.ts) / BLOCK_SLOPE_PRECISION) as u64;
            epoch += 1;

            if t_i == now.timestamp {
                last_point.blk = now.height;
                truncated = false;
                break;
            }
            self.global.write(epoch, last_point);
            weekly_points += 1;
        }

        Replay {
            point: last_point,
            epoch,
            weekly_points,
            truncated,
        }
    }
}
