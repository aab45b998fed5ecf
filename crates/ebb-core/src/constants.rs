//! Protocol constants. All durations are in seconds, all amounts in the
//! smallest unit of the locked token.

/// One week. Unlock times are rounded down to a multiple of this, and the
/// checkpoint replay advances in steps of this size.
pub const WEEK: u64 = 7 * 86_400;

/// Maximum lock duration (4 years).
///
/// A lock of `amount` created for the full duration starts with voting power
/// of (almost exactly) `amount`.
///
/// # Examples
///
/// ```
/// use ebb_core::constants::{MAXTIME, WEEK};
/// assert_eq!(MAXTIME, 126_144_000);
/// assert!(MAXTIME / WEEK >= 208);
/// ```
pub const MAXTIME: u64 = 4 * 365 * 86_400;

/// Upper bound on the number of weekly steps a single checkpoint replays.
///
/// 255 weeks is roughly 4.9 years. If the ledger has not been checkpointed
/// for longer than that, the remaining weeks are left for a later call.
pub const MAX_REPLAY_WEEKS: usize = 255;

/// Upper bound on bisection rounds when searching a ledger by block height
/// or timestamp. 128 rounds covers any `u64`-indexed history.
pub const MAX_BISECTION_STEPS: usize = 128;

/// Fixed-point denominator for the blocks-per-second estimate used to
/// interpolate block heights of weekly replay points.
pub const BLOCK_SLOPE_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Default token metadata reported by the escrow.
pub const DEFAULT_NAME: &str = "Vote-escrowed EBB";
/// Default token symbol reported by the escrow.
pub const DEFAULT_SYMBOL: &str = "veEBB";
/// Default version string reported by the escrow.
pub const DEFAULT_VERSION: &str = "ebb_1.0.0";
/// Default decimals reported by the escrow (mirrors the locked token).
pub const DEFAULT_DECIMALS: u8 = 18;
