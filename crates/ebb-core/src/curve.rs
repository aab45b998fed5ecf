//! Point/slope algebra.
//!
//! Voting power of a lock decays linearly to zero at its unlock time:
//! `slope = amount / MAXTIME` and `bias(t) = slope * (end - t)` while
//! `t < end`. All arithmetic is integer-only; intermediate negative values
//! are clamped to zero.

use crate::constants::{MAXTIME, WEEK};
use crate::types::{LockedBalance, Point};

/// Round a timestamp down to the start of its week.
///
/// # Examples
///
/// ```
/// use ebb_core::constants::WEEK;
/// use ebb_core::curve::round_to_week;
/// assert_eq!(round_to_week(WEEK * 3 + 5), WEEK * 3);
/// assert_eq!(round_to_week(WEEK * 3), WEEK * 3);
/// ```
pub fn round_to_week(t: u64) -> u64 {
    (t / WEEK) * WEEK
}

/// Per-second decay rate of a lock of `amount`. Truncates toward zero.
pub fn lock_slope(amount: i128) -> i128 {
    amount / MAXTIME as i128
}

/// `(slope, bias)` of a lock at `now`. Expired or empty locks yield `(0, 0)`.
pub fn lock_curve(lock: &LockedBalance, now: u64) -> (i128, i128) {
    if !lock.is_active(now) {
        return (0, 0);
    }
    let slope = lock_slope(lock.amount);
    let bias = slope * (lock.end - now) as i128;
    (slope, bias)
}

/// `bias - slope * dt` without clamping.
pub fn decay(bias: i128, slope: i128, dt: u64) -> i128 {
    bias - slope * dt as i128
}

/// Value of `point` at `t`, clamped at zero.
///
/// `t` is expected to be at or after `point.ts`; an earlier `t` is treated
/// as `point.ts`.
///
/// # Examples
///
/// ```
/// use ebb_core::curve::project;
/// use ebb_core::types::Point;
/// let p = Point { bias: 100, slope: 2, ts: 10, blk: 1 };
/// assert_eq!(project(&p, 10), 100);
/// assert_eq!(project(&p, 40), 40);
/// assert_eq!(project(&p, 1_000), 0);
/// ```
pub fn project(point: &Point, t: u64) -> u128 {
    let value = decay(point.bias, point.slope, t.saturating_sub(point.ts));
    if value > 0 { value as u128 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn slope_truncates() {
        assert_eq!(lock_slope(MAXTIME as i128 - 1), 0);
        assert_eq!(lock_slope(MAXTIME as i128), 1);
        assert_eq!(lock_slope(MAXTIME as i128 * 2 + 7), 2);
    }

    #[test]
    fn full_duration_lock_starts_near_amount() {
        let amount = 1_000_000 * MAXTIME as i128;
        let lock = LockedBalance::new(amount, MAXTIME);
        let (_, bias) = lock_curve(&lock, 0);
        assert_eq!(bias, amount);
    }

    #[test]
    fn curve_zero_at_end() {
        let lock = LockedBalance::new(10 * MAXTIME as i128, 5 * WEEK);
        assert_eq!(lock_curve(&lock, 5 * WEEK), (0, 0));
        assert_eq!(lock_curve(&lock, 6 * WEEK), (0, 0));
    }

    #[test]
    fn project_before_anchor_returns_bias() {
        let p = Point {
            bias: 50,
            slope: 1,
            ts: 100,
            blk: 0,
        };
        assert_eq!(project(&p, 0), 50);
    }

    #[test]
    fn project_clamps_negative_bias() {
        let p = Point {
            bias: -10,
            slope: 0,
            ts: 0,
            blk: 0,
        };
        assert_eq!(project(&p, 0), 0);
    }

    proptest! {
        #[test]
        fn projection_is_non_increasing(
            bias in 0i128..1_000_000_000_000,
            slope in 0i128..1_000_000,
            a in 0u64..10_000_000,
            b in 0u64..10_000_000,
        ) {
            let p = Point { bias, slope, ts: 0, blk: 0 };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(project(&p, hi) <= project(&p, lo));
        }

        #[test]
        fn lock_bias_never_exceeds_amount(
            amount in 1i128..1_000_000_000_000_000_000,
            weeks in 1u64..=208,
        ) {
            let end = weeks * WEEK;
            let (_, bias) = lock_curve(&LockedBalance::new(amount, end), 0);
            prop_assert!(bias <= amount);
        }
    }
}
