//! Core ledger types: points, locked balances, block and call context.
//!
//! Bias and slope are signed so that transient negative values produced by
//! subtraction can be detected and clamped to zero. Stored values are always
//! non-negative.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::curve;

/// A snapshot of a linearly decaying curve.
///
/// The value of the curve at any `t >= ts` (until the next recorded point or
/// scheduled slope change) is `max(bias - slope * (t - ts), 0)`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Point {
    /// Voting power at `ts`.
    pub bias: i128,
    /// Voting power lost per second.
    pub slope: i128,
    /// Timestamp the snapshot was taken at.
    pub ts: u64,
    /// Block height the snapshot was taken at.
    pub blk: u64,
}

impl Point {
    /// Create a point anchored at the given block.
    pub fn new(bias: i128, slope: i128, at: BlockInfo) -> Self {
        Self {
            bias,
            slope,
            ts: at.timestamp,
            blk: at.height,
        }
    }

    /// An empty point anchored at the given block.
    pub fn anchor(at: BlockInfo) -> Self {
        Self::new(0, 0, at)
    }

    /// Value of this curve at `t`, clamped at zero.
    ///
    /// See [`curve::project`].
    pub fn project(&self, t: u64) -> u128 {
        curve::project(self, t)
    }

    /// Clamp negative bias and slope to zero.
    pub fn clamp(&mut self) {
        if self.bias < 0 {
            self.bias = 0;
        }
        if self.slope < 0 {
            self.slope = 0;
        }
    }
}

/// An account's current lock.
///
/// `end == 0 && amount == 0` is the "no lock" state. A lock with
/// `amount > 0` is either active (`end > now`) or expired and awaiting
/// withdrawal (`end <= now`).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct LockedBalance {
    /// Locked token amount.
    pub amount: i128,
    /// Week-aligned unlock timestamp, or 0 for no lock.
    pub end: u64,
}

impl LockedBalance {
    /// Create a locked balance.
    pub fn new(amount: i128, end: u64) -> Self {
        Self { amount, end }
    }

    /// Whether nothing is locked.
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }

    /// Whether the lock still contributes voting power at `now`.
    pub fn is_active(&self, now: u64) -> bool {
        self.amount > 0 && self.end > now
    }

    /// The lock's decay curve anchored at `at`.
    ///
    /// Inactive locks contribute a zero point.
    pub fn point_at(&self, at: BlockInfo) -> Point {
        let (slope, bias) = curve::lock_curve(self, at.timestamp);
        Point::new(bias, slope, at)
    }
}

/// Timestamp and height of the block a call executes in.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockInfo {
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Block height.
    pub height: u64,
}

impl BlockInfo {
    pub fn new(timestamp: u64, height: u64) -> Self {
        Self { timestamp, height }
    }
}

/// Context of a state-changing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxContext {
    /// Immediate caller.
    pub sender: Address,
    /// Account that originated the enclosing transaction. Differs from
    /// `sender` when the call comes from a contract wallet.
    pub origin: Address,
    /// Block the call executes in.
    pub block: BlockInfo,
}

impl TxContext {
    /// A call made directly by an externally owned account.
    pub fn direct(sender: Address, block: BlockInfo) -> Self {
        Self {
            sender,
            origin: sender,
            block,
        }
    }

    /// A call relayed through a contract (`sender`) on behalf of `origin`.
    pub fn relayed(sender: Address, origin: Address, block: BlockInfo) -> Self {
        Self {
            sender,
            origin,
            block,
        }
    }

    /// Whether the caller is the transaction origin.
    pub fn is_direct(&self) -> bool {
        self.sender == self.origin
    }

    /// Current timestamp.
    pub fn now(&self) -> u64 {
        self.block.timestamp
    }
}

/// Kind of lock operation recorded in a deposit event.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum DepositKind {
    DepositFor,
    CreateLock,
    IncreaseLockAmount,
    IncreaseUnlockTime,
}
