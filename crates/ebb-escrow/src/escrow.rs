//! The vote-escrow service.
//!
//! [`VotingEscrow`] owns the lock table, the running supply, the admin slots,
//! and the [`LedgerStore`]. Every state-changing call:
//!
//! 1. enters the non-reentrant section (a nested call from a token or
//!    checker callback is rejected with [`AccessError::Reentrant`]),
//! 2. validates its preconditions against the current state, including
//!    that its block is not behind the latest recorded point,
//! 3. performs the external token transfer, and only then
//! 4. commits the ledger checkpoint, lock table, and supply.
//!
//! The checkpoint itself cannot fail, so a call either commits everything or
//! nothing. Read-only queries may run while a call is in flight (for example
//! from inside a transfer callback) and observe the pre-call state.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use ebb_core::address::Address;
use ebb_core::constants::MAXTIME;
use ebb_core::curve::round_to_week;
use ebb_core::error::{AccessError, EbbError, LockError};
use ebb_core::traits::{TokenLedger, WalletChecker};
use ebb_core::types::{BlockInfo, DepositKind, LockedBalance, Point, TxContext};
use ebb_ledger::{CheckpointReport, LedgerStore};

use crate::config::EscrowConfig;
use crate::events::EscrowEvent;

/// Persistent escrow state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct EscrowSnapshot {
    /// Voting-power history.
    pub ledger: LedgerStore,
    /// Current lock per account. Accounts without a lock are absent.
    pub locked: HashMap<Address, LockedBalance>,
    /// Total tokens held in locks.
    pub supply: u128,
    /// Current admin.
    pub admin: Address,
    /// Admin committed but not yet applied.
    pub future_admin: Address,
}

impl EscrowSnapshot {
    /// Fresh state with the ledger seeded at `at`.
    pub fn new(admin: Address, at: BlockInfo) -> Self {
        Self {
            ledger: LedgerStore::new(at),
            locked: HashMap::new(),
            supply: 0,
            admin,
            future_admin: Address::ZERO,
        }
    }

    fn locked_of(&self, account: &Address) -> LockedBalance {
        self.locked.get(account).copied().unwrap_or_default()
    }
}

#[derive(Default)]
struct CheckerSlots {
    current: Option<Arc<dyn WalletChecker>>,
    future: Option<Arc<dyn WalletChecker>>,
}

struct Inner {
    entered: Cell<bool>,
    state: RefCell<EscrowSnapshot>,
    checker: RefCell<CheckerSlots>,
    events: RefCell<Vec<EscrowEvent>>,
}

/// Clears the entered flag when a call leaves the non-reentrant section.
struct Entered<'a>(&'a Cell<bool>);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Vote-escrow: lock tokens, receive linearly decaying voting power.
pub struct VotingEscrow {
    config: EscrowConfig,
    token: Arc<dyn TokenLedger>,
    inner: ReentrantMutex<Inner>,
}

impl VotingEscrow {
    /// Create an escrow whose history starts at `at`.
    pub fn new(config: EscrowConfig, token: Arc<dyn TokenLedger>, at: BlockInfo) -> Self {
        let snapshot = EscrowSnapshot::new(config.admin, at);
        Self::from_snapshot(config, token, snapshot)
    }

    /// Restore an escrow from persisted state.
    ///
    /// The wallet checker is not persisted and starts unset.
    pub fn from_snapshot(
        config: EscrowConfig,
        token: Arc<dyn TokenLedger>,
        snapshot: EscrowSnapshot,
    ) -> Self {
        Self {
            config,
            token,
            inner: ReentrantMutex::new(Inner {
                entered: Cell::new(false),
                state: RefCell::new(snapshot),
                checker: RefCell::new(CheckerSlots::default()),
                events: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Copy of the persistent state.
    pub fn snapshot(&self) -> EscrowSnapshot {
        self.view(|s| s.clone())
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Call plumbing
    // ------------------------------------------------------------------

    fn transact<R>(&self, f: impl FnOnce(&Inner) -> Result<R, EbbError>) -> Result<R, EbbError> {
        let inner = self.inner.lock();
        if inner.entered.replace(true) {
            return Err(AccessError::Reentrant.into());
        }
        let _entered = Entered(&inner.entered);
        f(&inner)
    }

    fn view<R>(&self, f: impl FnOnce(&EscrowSnapshot) -> R) -> R {
        let inner = self.inner.lock();
        let state = inner.state.borrow();
        f(&state)
    }

    fn emit(inner: &Inner, events: impl IntoIterator<Item = EscrowEvent>) {
        inner.events.borrow_mut().extend(events);
    }

    /// Reject contract callers unless the allow-list admits them.
    fn assert_not_contract(inner: &Inner, ctx: &TxContext) -> Result<(), EbbError> {
        if ctx.is_direct() {
            return Ok(());
        }
        let checker = inner.checker.borrow().current.clone();
        match checker {
            Some(checker) if !checker.check(&ctx.sender) => {
                Err(AccessError::ContractCallerDenied(ctx.sender.to_string()).into())
            }
            _ => Ok(()),
        }
    }

    /// Reject a block older than the latest global point, in time or height.
    fn assert_block_ahead(inner: &Inner, block: BlockInfo) -> Result<(), LockError> {
        let head = inner.state.borrow().ledger.global().last();
        if block.timestamp < head.ts || block.height < head.blk {
            return Err(LockError::BlockBehindHistory {
                ts: block.timestamp,
                height: block.height,
                head_ts: head.ts,
                head_height: head.blk,
            });
        }
        Ok(())
    }

    fn assert_admin(inner: &Inner, ctx: &TxContext) -> Result<(), EbbError> {
        if inner.state.borrow().admin != ctx.sender {
            return Err(AccessError::NotAdmin.into());
        }
        Ok(())
    }

    /// Add `value` to `beneficiary`'s lock (and move its end to
    /// `unlock_time` if non-zero), paid by `payer`.
    #[allow(clippy::too_many_arguments)]
    fn deposit(
        &self,
        inner: &Inner,
        ctx: &TxContext,
        payer: &Address,
        beneficiary: &Address,
        value: u128,
        unlock_time: u64,
        old: LockedBalance,
        kind: DepositKind,
    ) -> Result<CheckpointReport, EbbError> {
        Self::assert_block_ahead(inner, ctx.block)?;
        let delta = i128::try_from(value).map_err(|_| LockError::ValueOverflow)?;
        let mut new = old;
        new.amount = old
            .amount
            .checked_add(delta)
            .ok_or(LockError::ValueOverflow)?;
        if unlock_time != 0 {
            new.end = unlock_time;
        }
        let prev_supply = inner.state.borrow().supply;
        let supply = prev_supply
            .checked_add(value)
            .ok_or(LockError::ValueOverflow)?;
        // Global bias and slope are signed sums over all locks.
        if supply > i128::MAX as u128 {
            return Err(LockError::ValueOverflow.into());
        }

        if value != 0 {
            self.token
                .transfer_from(payer, &self.config.escrow_address, value)?;
        }

        let report = {
            let mut state = inner.state.borrow_mut();
            let report = state
                .ledger
                .checkpoint(Some(beneficiary), &old, &new, ctx.block);
            state.locked.insert(*beneficiary, new);
            state.supply = supply;
            report
        };

        Self::emit(
            inner,
            [
                EscrowEvent::Deposit {
                    provider: *beneficiary,
                    value,
                    locktime: new.end,
                    kind,
                    ts: ctx.now(),
                },
                EscrowEvent::Supply {
                    prev_supply,
                    supply,
                },
            ],
        );
        info!(
            account = %beneficiary,
            value,
            end = new.end,
            ?kind,
            epoch = report.to_epoch,
            "deposit"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Lock management
    // ------------------------------------------------------------------

    /// Lock `value` tokens until `unlock_time`, rounded down to a week.
    ///
    /// # Errors
    ///
    /// - [`LockError::ZeroValue`] if `value` is 0
    /// - [`LockError::LockExists`] if the caller already has a lock
    /// - [`LockError::UnlockTimeNotFuture`] if the rounded time is not after now
    /// - [`LockError::LockTooLong`] if the rounded time is beyond now + [`MAXTIME`]
    pub fn create_lock(
        &self,
        ctx: &TxContext,
        value: u128,
        unlock_time: u64,
    ) -> Result<(), EbbError> {
        self.transact(|inner| {
            Self::assert_not_contract(inner, ctx)?;
            let now = ctx.now();
            let unlock_time = round_to_week(unlock_time);
            let locked = inner.state.borrow().locked_of(&ctx.sender);

            if value == 0 {
                return Err(LockError::ZeroValue.into());
            }
            if locked.amount != 0 {
                return Err(LockError::LockExists.into());
            }
            if unlock_time <= now {
                return Err(LockError::UnlockTimeNotFuture { unlock_time, now }.into());
            }
            let limit = now + MAXTIME;
            if unlock_time > limit {
                return Err(LockError::LockTooLong {
                    unlock_time,
                    limit,
                    max: MAXTIME,
                }
                .into());
            }

            self.deposit(
                inner,
                ctx,
                &ctx.sender,
                &ctx.sender,
                value,
                unlock_time,
                locked,
                DepositKind::CreateLock,
            )
            .map(drop)
        })
    }

    /// Add `value` tokens to the caller's active lock without changing its end.
    pub fn increase_amount(&self, ctx: &TxContext, value: u128) -> Result<(), EbbError> {
        self.transact(|inner| {
            Self::assert_not_contract(inner, ctx)?;
            let locked = inner.state.borrow().locked_of(&ctx.sender);
            Self::check_top_up(&locked, value, ctx.now())?;
            self.deposit(
                inner,
                ctx,
                &ctx.sender,
                &ctx.sender,
                value,
                0,
                locked,
                DepositKind::IncreaseLockAmount,
            )
            .map(drop)
        })
    }

    /// Move the caller's unlock time later, to `unlock_time` rounded down to
    /// a week.
    pub fn increase_unlock_time(&self, ctx: &TxContext, unlock_time: u64) -> Result<(), EbbError> {
        self.transact(|inner| {
            Self::assert_not_contract(inner, ctx)?;
            let now = ctx.now();
            let unlock_time = round_to_week(unlock_time);
            let locked = inner.state.borrow().locked_of(&ctx.sender);

            if locked.end <= now {
                return Err(LockError::LockExpired { end: locked.end }.into());
            }
            if locked.amount <= 0 {
                return Err(LockError::NoLock.into());
            }
            if unlock_time <= locked.end {
                return Err(LockError::UnlockTimeNotIncreased {
                    requested: unlock_time,
                    current: locked.end,
                }
                .into());
            }
            let limit = now + MAXTIME;
            if unlock_time > limit {
                return Err(LockError::LockTooLong {
                    unlock_time,
                    limit,
                    max: MAXTIME,
                }
                .into());
            }

            self.deposit(
                inner,
                ctx,
                &ctx.sender,
                &ctx.sender,
                0,
                unlock_time,
                locked,
                DepositKind::IncreaseUnlockTime,
            )
            .map(drop)
        })
    }

    /// Add `value` tokens, paid by the caller, to `beneficiary`'s active lock.
    ///
    /// Anyone may top up anyone else's lock; the allow-list does not apply.
    pub fn deposit_for(
        &self,
        ctx: &TxContext,
        beneficiary: &Address,
        value: u128,
    ) -> Result<(), EbbError> {
        self.transact(|inner| {
            let locked = inner.state.borrow().locked_of(beneficiary);
            Self::check_top_up(&locked, value, ctx.now())?;
            self.deposit(
                inner,
                ctx,
                &ctx.sender,
                beneficiary,
                value,
                0,
                locked,
                DepositKind::DepositFor,
            )
            .map(drop)
        })
    }

    fn check_top_up(locked: &LockedBalance, value: u128, now: u64) -> Result<(), LockError> {
        if value == 0 {
            return Err(LockError::ZeroValue);
        }
        if locked.amount <= 0 {
            return Err(LockError::NoLock);
        }
        if locked.end <= now {
            return Err(LockError::LockExpired { end: locked.end });
        }
        Ok(())
    }

    /// Withdraw all tokens of the caller's expired lock.
    ///
    /// # Errors
    ///
    /// [`LockError::LockNotExpired`] if the lock end is still in the future.
    pub fn withdraw(&self, ctx: &TxContext) -> Result<u128, EbbError> {
        self.transact(|inner| {
            Self::assert_block_ahead(inner, ctx.block)?;
            let now = ctx.now();
            let (old, prev_supply) = {
                let state = inner.state.borrow();
                (state.locked_of(&ctx.sender), state.supply)
            };
            if now < old.end {
                return Err(LockError::LockNotExpired { end: old.end, now }.into());
            }
            let value = u128::try_from(old.amount).map_err(|_| LockError::ValueOverflow)?;
            let supply = prev_supply
                .checked_sub(value)
                .ok_or(LockError::ValueOverflow)?;

            if value != 0 {
                self.token.transfer(&ctx.sender, value)?;
            }

            let report = {
                let mut state = inner.state.borrow_mut();
                let report = state.ledger.checkpoint(
                    Some(&ctx.sender),
                    &old,
                    &LockedBalance::default(),
                    ctx.block,
                );
                state.locked.remove(&ctx.sender);
                state.supply = supply;
                report
            };

            Self::emit(
                inner,
                [
                    EscrowEvent::Withdraw {
                        provider: ctx.sender,
                        value,
                        ts: now,
                    },
                    EscrowEvent::Supply {
                        prev_supply,
                        supply,
                    },
                ],
            );
            info!(account = %ctx.sender, value, epoch = report.to_epoch, "withdraw");
            Ok(value)
        })
    }

    /// Advance the global history to `block` without touching any account.
    ///
    /// # Errors
    ///
    /// [`LockError::BlockBehindHistory`] if `block` is older than the latest
    /// global point.
    pub fn checkpoint(&self, block: BlockInfo) -> Result<CheckpointReport, EbbError> {
        self.transact(|inner| {
            Self::assert_block_ahead(inner, block)?;
            let none = LockedBalance::default();
            Ok(inner
                .state
                .borrow_mut()
                .ledger
                .checkpoint(None, &none, &none, block))
        })
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    /// Commit `future_admin` as the next admin. Admin only.
    pub fn commit_transfer_ownership(
        &self,
        ctx: &TxContext,
        future_admin: Address,
    ) -> Result<(), EbbError> {
        self.transact(|inner| {
            Self::assert_admin(inner, ctx)?;
            inner.state.borrow_mut().future_admin = future_admin;
            Self::emit(inner, [EscrowEvent::CommitOwnership { admin: future_admin }]);
            info!(admin = %future_admin, "committed ownership transfer");
            Ok(())
        })
    }

    /// Make the committed admin the current admin. Admin only.
    pub fn apply_transfer_ownership(&self, ctx: &TxContext) -> Result<(), EbbError> {
        self.transact(|inner| {
            Self::assert_admin(inner, ctx)?;
            let admin = {
                let mut state = inner.state.borrow_mut();
                if state.future_admin.is_zero() {
                    return Err(AccessError::AdminNotSet.into());
                }
                state.admin = state.future_admin;
                state.admin
            };
            Self::emit(inner, [EscrowEvent::ApplyOwnership { admin }]);
            info!(%admin, "applied ownership transfer");
            Ok(())
        })
    }

    /// Stage a wallet checker (`None` to remove the allow-list). Admin only.
    pub fn commit_smart_wallet_checker(
        &self,
        ctx: &TxContext,
        checker: Option<Arc<dyn WalletChecker>>,
    ) -> Result<(), EbbError> {
        self.transact(|inner| {
            Self::assert_admin(inner, ctx)?;
            inner.checker.borrow_mut().future = checker;
            Ok(())
        })
    }

    /// Activate the staged wallet checker. Admin only.
    pub fn apply_smart_wallet_checker(&self, ctx: &TxContext) -> Result<(), EbbError> {
        self.transact(|inner| {
            Self::assert_admin(inner, ctx)?;
            let mut slots = inner.checker.borrow_mut();
            let staged = slots.future.clone();
            slots.current = staged;
            info!(enabled = slots.current.is_some(), "applied wallet checker");
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Voting power of `account` at timestamp `t`.
    pub fn voting_power_of(&self, account: &Address, t: u64) -> u128 {
        self.view(|s| s.ledger.balance_of(account, t))
    }

    /// Voting power of `account` at block `block`, given the current block.
    pub fn voting_power_of_at(
        &self,
        account: &Address,
        block: u64,
        current: BlockInfo,
    ) -> Result<u128, EbbError> {
        Ok(self.view(|s| s.ledger.balance_of_at(account, block, current))?)
    }

    /// Aggregate voting power at timestamp `t`.
    pub fn total_voting_power(&self, t: u64) -> u128 {
        self.view(|s| s.ledger.total_supply(t))
    }

    /// Aggregate voting power at block `block`, given the current block.
    pub fn total_voting_power_at(&self, block: u64, current: BlockInfo) -> Result<u128, EbbError> {
        Ok(self.view(|s| s.ledger.total_supply_at(block, current))?)
    }

    /// Current lock of `account`.
    pub fn locked(&self, account: &Address) -> LockedBalance {
        self.view(|s| s.locked_of(account))
    }

    /// Unlock time of `account`'s lock, 0 if none.
    pub fn locked_end(&self, account: &Address) -> u64 {
        self.locked(account).end
    }

    /// Slope of `account`'s latest recorded point.
    pub fn get_last_user_slope(&self, account: &Address) -> i128 {
        self.view(|s| s.ledger.user(account).map_or(0, |u| u.last().slope))
    }

    /// Number of points recorded for `account`.
    pub fn user_point_epoch(&self, account: &Address) -> u64 {
        self.view(|s| s.ledger.user_epoch(account))
    }

    /// Point `idx` of `account`'s history. Index 0 is the zero sentinel.
    pub fn user_point_history(&self, account: &Address, idx: u64) -> Option<Point> {
        self.view(|s| s.ledger.user(account).and_then(|u| u.get(idx).copied()))
    }

    /// Timestamp of point `idx` of `account`'s history, 0 if absent.
    pub fn user_point_history_ts(&self, account: &Address, idx: u64) -> u64 {
        self.user_point_history(account, idx).map_or(0, |p| p.ts)
    }

    /// Current global epoch.
    pub fn epoch(&self) -> u64 {
        self.view(|s| s.ledger.global().epoch())
    }

    /// Global point at `epoch`.
    pub fn point_history(&self, epoch: u64) -> Option<Point> {
        self.view(|s| s.ledger.global().get(epoch).copied())
    }

    /// Scheduled slope change at `t`.
    pub fn slope_change(&self, t: u64) -> i128 {
        self.view(|s| s.ledger.slope_changes().at(t))
    }

    /// Total tokens held in locks.
    pub fn supply(&self) -> u128 {
        self.view(|s| s.supply)
    }

    pub fn admin(&self) -> Address {
        self.view(|s| s.admin)
    }

    pub fn future_admin(&self) -> Address {
        self.view(|s| s.future_admin)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn decimals(&self) -> u8 {
        self.config.decimals
    }

    /// Drain the event log.
    pub fn take_events(&self) -> Vec<EscrowEvent> {
        let inner = self.inner.lock();
        std::mem::take(&mut *inner.events.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    use ebb_core::constants::WEEK;
    use ebb_core::error::{QueryError, TransferError};
    use parking_lot::Mutex;

    use crate::token::{MemoryToken, StaticChecker};

    const T0: u64 = 1_000 * WEEK;
    const UNIT: u128 = MAXTIME as u128;
    const ESCROW: Address = Address([0xEE; 20]);
    const ADMIN: Address = Address([0xAD; 20]);
    const ALICE: Address = Address([0xA1; 20]);
    const BOB: Address = Address([0xB0; 20]);
    const CAROL: Address = Address([0xC0; 20]);
    const WALLET_OK: Address = Address([0x01; 20]);
    const WALLET_BAD: Address = Address([0x02; 20]);

    fn block(offset: u64) -> BlockInfo {
        BlockInfo::new(T0 + offset, 10 + offset / 12)
    }

    fn ctx(who: Address, offset: u64) -> TxContext {
        TxContext::direct(who, block(offset))
    }

    fn config() -> EscrowConfig {
        EscrowConfig {
            admin: ADMIN,
            escrow_address: ESCROW,
            ..EscrowConfig::default()
        }
    }

    fn setup() -> (VotingEscrow, Arc<MemoryToken>) {
        let token = Arc::new(MemoryToken::new(ESCROW));
        for who in [ALICE, BOB, WALLET_OK, WALLET_BAD] {
            token.mint(&who, 1_000_000 * UNIT);
            token.approve(&who, &ESCROW, u128::MAX);
        }
        let escrow = VotingEscrow::new(config(), token.clone(), block(0));
        (escrow, token)
    }

    // ------------------------------------------------------------------
    // create_lock
    // ------------------------------------------------------------------

    #[test]
    fn create_lock_moves_tokens_and_records_power() {
        let (escrow, token) = setup();
        let value = 1_000 * UNIT;
        escrow
            .create_lock(&ctx(ALICE, 100), value, T0 + 10 * WEEK + 5)
            .unwrap();

        let lock = escrow.locked(&ALICE);
        assert_eq!(lock, LockedBalance::new(value as i128, T0 + 10 * WEEK));
        assert_eq!(escrow.locked_end(&ALICE), T0 + 10 * WEEK);
        assert_eq!(token.balance_of(&ESCROW), value);
        assert_eq!(escrow.supply(), value);
        assert_eq!(
            escrow.voting_power_of(&ALICE, T0 + 100),
            1_000 * (10 * WEEK - 100) as u128
        );
        assert_eq!(escrow.get_last_user_slope(&ALICE), 1_000);
        assert_eq!(escrow.user_point_epoch(&ALICE), 1);
        assert_eq!(escrow.user_point_history_ts(&ALICE, 1), T0 + 100);
        assert_eq!(escrow.slope_change(T0 + 10 * WEEK), -1_000);

        assert_eq!(
            escrow.take_events(),
            vec![
                EscrowEvent::Deposit {
                    provider: ALICE,
                    value,
                    locktime: T0 + 10 * WEEK,
                    kind: DepositKind::CreateLock,
                    ts: T0 + 100,
                },
                EscrowEvent::Supply {
                    prev_supply: 0,
                    supply: value,
                },
            ]
        );
        assert!(escrow.take_events().is_empty());
    }

    #[test]
    fn create_lock_rejects_bad_input() {
        let (escrow, _) = setup();
        let c = ctx(ALICE, 100);

        assert!(matches!(
            escrow.create_lock(&c, 0, T0 + WEEK),
            Err(EbbError::Lock(LockError::ZeroValue))
        ));
        // Rounds down into the current week.
        assert!(matches!(
            escrow.create_lock(&c, UNIT, T0 + 500),
            Err(EbbError::Lock(LockError::UnlockTimeNotFuture { .. }))
        ));
        assert!(matches!(
            escrow.create_lock(&c, UNIT, T0 + 100 + MAXTIME + WEEK),
            Err(EbbError::Lock(LockError::LockTooLong { .. }))
        ));

        escrow.create_lock(&c, UNIT, T0 + WEEK).unwrap();
        assert!(matches!(
            escrow.create_lock(&c, UNIT, T0 + 2 * WEEK),
            Err(EbbError::Lock(LockError::LockExists))
        ));
    }

    #[test]
    fn create_lock_allows_maximum_duration() {
        let (escrow, _) = setup();
        escrow
            .create_lock(&ctx(ALICE, 0), UNIT, T0 + MAXTIME)
            .unwrap();
        assert_eq!(escrow.locked_end(&ALICE), round_to_week(T0 + MAXTIME));
    }

    // ------------------------------------------------------------------
    // increase_amount / increase_unlock_time / deposit_for
    // ------------------------------------------------------------------

    #[test]
    fn increase_amount_keeps_end() {
        let (escrow, _) = setup();
        assert!(matches!(
            escrow.increase_amount(&ctx(ALICE, 0), UNIT),
            Err(EbbError::Lock(LockError::NoLock))
        ));
        escrow
            .create_lock(&ctx(ALICE, 0), 2 * UNIT, T0 + 4 * WEEK)
            .unwrap();
        assert!(matches!(
            escrow.increase_amount(&ctx(ALICE, 10), 0),
            Err(EbbError::Lock(LockError::ZeroValue))
        ));
        escrow.increase_amount(&ctx(ALICE, 10), 3 * UNIT).unwrap();

        assert_eq!(
            escrow.locked(&ALICE),
            LockedBalance::new(5 * UNIT as i128, T0 + 4 * WEEK)
        );
        assert_eq!(escrow.slope_change(T0 + 4 * WEEK), -5);
        assert_eq!(escrow.supply(), 5 * UNIT);
        assert!(matches!(
            escrow.increase_amount(&ctx(ALICE, 4 * WEEK), UNIT),
            Err(EbbError::Lock(LockError::LockExpired { .. }))
        ));
    }

    #[test]
    fn increase_unlock_time_requires_later_end() {
        let (escrow, _) = setup();
        assert!(matches!(
            escrow.increase_unlock_time(&ctx(ALICE, 0), T0 + 2 * WEEK),
            Err(EbbError::Lock(LockError::LockExpired { end: 0 }))
        ));
        escrow
            .create_lock(&ctx(ALICE, 0), UNIT, T0 + 4 * WEEK)
            .unwrap();

        assert!(matches!(
            escrow.increase_unlock_time(&ctx(ALICE, 50), T0 + 4 * WEEK + 100),
            Err(EbbError::Lock(LockError::UnlockTimeNotIncreased { .. }))
        ));
        assert!(matches!(
            escrow.increase_unlock_time(&ctx(ALICE, 50), T0 + 3 * WEEK),
            Err(EbbError::Lock(LockError::UnlockTimeNotIncreased { .. }))
        ));
        assert!(matches!(
            escrow.increase_unlock_time(&ctx(ALICE, 50), T0 + 2 * MAXTIME),
            Err(EbbError::Lock(LockError::LockTooLong { .. }))
        ));

        let before = escrow.voting_power_of(&ALICE, T0 + 50);
        escrow
            .increase_unlock_time(&ctx(ALICE, 50), T0 + 8 * WEEK)
            .unwrap();
        assert!(escrow.voting_power_of(&ALICE, T0 + 50) > before);
        assert_eq!(escrow.slope_change(T0 + 4 * WEEK), 0);
        assert_eq!(escrow.slope_change(T0 + 8 * WEEK), -1);
        let events = escrow.take_events();
        assert!(matches!(
            events[events.len() - 2],
            EscrowEvent::Deposit {
                kind: DepositKind::IncreaseUnlockTime,
                value: 0,
                ..
            }
        ));
    }

    #[test]
    fn deposit_for_is_paid_by_caller() {
        let (escrow, token) = setup();
        escrow
            .create_lock(&ctx(ALICE, 0), UNIT, T0 + 4 * WEEK)
            .unwrap();
        let bob_before = token.balance_of(&BOB);
        let alice_before = token.balance_of(&ALICE);

        escrow.deposit_for(&ctx(BOB, 20), &ALICE, 2 * UNIT).unwrap();

        assert_eq!(token.balance_of(&BOB), bob_before - 2 * UNIT);
        assert_eq!(token.balance_of(&ALICE), alice_before);
        assert_eq!(escrow.locked(&ALICE).amount, 3 * UNIT as i128);
        assert_eq!(escrow.user_point_epoch(&BOB), 0);

        assert!(matches!(
            escrow.deposit_for(&ctx(BOB, 20), &CAROL, UNIT),
            Err(EbbError::Lock(LockError::NoLock))
        ));
        assert!(matches!(
            escrow.deposit_for(&ctx(BOB, 20), &ALICE, 0),
            Err(EbbError::Lock(LockError::ZeroValue))
        ));
    }

    // ------------------------------------------------------------------
    // withdraw
    // ------------------------------------------------------------------

    #[test]
    fn withdraw_only_after_expiry() {
        let (escrow, token) = setup();
        let value = 7 * UNIT;
        escrow
            .create_lock(&ctx(ALICE, 0), value, T0 + 2 * WEEK)
            .unwrap();
        escrow.take_events();
        let alice_before = token.balance_of(&ALICE);

        assert!(matches!(
            escrow.withdraw(&ctx(ALICE, 2 * WEEK - 1)),
            Err(EbbError::Lock(LockError::LockNotExpired { .. }))
        ));

        assert_eq!(escrow.withdraw(&ctx(ALICE, 2 * WEEK)).unwrap(), value);
        assert_eq!(token.balance_of(&ALICE), alice_before + value);
        assert_eq!(escrow.locked(&ALICE), LockedBalance::default());
        assert_eq!(escrow.supply(), 0);
        assert_eq!(escrow.voting_power_of(&ALICE, T0 + 2 * WEEK), 0);
        assert_eq!(
            escrow.take_events(),
            vec![
                EscrowEvent::Withdraw {
                    provider: ALICE,
                    value,
                    ts: T0 + 2 * WEEK,
                },
                EscrowEvent::Supply {
                    prev_supply: value,
                    supply: 0,
                },
            ]
        );
        // A fresh lock is possible again.
        escrow
            .create_lock(&ctx(ALICE, 2 * WEEK), value, T0 + 5 * WEEK)
            .unwrap();
    }

    // ------------------------------------------------------------------
    // Atomicity and reentrancy
    // ------------------------------------------------------------------

    #[test]
    fn failed_transfer_changes_nothing() {
        let (escrow, _) = setup();
        escrow.checkpoint(block(5)).unwrap();
        let before = escrow.snapshot();

        let err = escrow
            .create_lock(&ctx(CAROL, 10), UNIT, T0 + 2 * WEEK)
            .unwrap_err();
        assert!(matches!(
            err,
            EbbError::Transfer(TransferError::InsufficientAllowance { .. })
        ));
        assert_eq!(escrow.snapshot(), before);
        assert!(escrow.take_events().is_empty());

        // The guard was released.
        escrow
            .create_lock(&ctx(ALICE, 10), UNIT, T0 + 2 * WEEK)
            .unwrap();
    }

    #[test]
    fn stale_timestamp_is_rejected_before_transfer() {
        let (escrow, token) = setup();
        escrow
            .create_lock(&ctx(ALICE, 2 * WEEK), 2 * UNIT, T0 + 6 * WEEK)
            .unwrap();
        escrow.take_events();
        let before = escrow.snapshot();
        let bob_before = token.balance_of(&BOB);
        let escrow_before = token.balance_of(&ESCROW);

        let err = escrow
            .create_lock(&ctx(BOB, WEEK), UNIT, T0 + 4 * WEEK)
            .unwrap_err();
        assert!(matches!(
            err,
            EbbError::Lock(LockError::BlockBehindHistory { ts, head_ts, .. })
                if ts == T0 + WEEK && head_ts == T0 + 2 * WEEK
        ));
        assert!(matches!(
            escrow.checkpoint(block(WEEK)),
            Err(EbbError::Lock(LockError::BlockBehindHistory { .. }))
        ));

        assert_eq!(escrow.snapshot(), before);
        assert_eq!(token.balance_of(&BOB), bob_before);
        assert_eq!(token.balance_of(&ESCROW), escrow_before);
        assert_eq!(escrow.user_point_epoch(&BOB), 0);
        assert!(escrow.take_events().is_empty());
    }

    #[test]
    fn stale_height_is_rejected() {
        let (escrow, token) = setup();
        escrow
            .create_lock(&ctx(ALICE, 100), 2 * UNIT, T0 + 2 * WEEK)
            .unwrap();
        let head = escrow.point_history(escrow.epoch()).unwrap();
        let before = escrow.snapshot();
        let alice_before = token.balance_of(&ALICE);

        let regressed = BlockInfo::new(T0 + 200, head.blk - 5);
        assert!(matches!(
            escrow.checkpoint(regressed),
            Err(EbbError::Lock(LockError::BlockBehindHistory { head_height, .. }))
                if head_height == head.blk
        ));
        assert!(matches!(
            escrow.increase_amount(&TxContext::direct(ALICE, regressed), UNIT),
            Err(EbbError::Lock(LockError::BlockBehindHistory { .. }))
        ));
        assert!(matches!(
            escrow.withdraw(&TxContext::direct(ALICE, BlockInfo::new(T0 + 3 * WEEK, 0))),
            Err(EbbError::Lock(LockError::BlockBehindHistory { .. }))
        ));
        assert_eq!(escrow.snapshot(), before);
        assert_eq!(token.balance_of(&ALICE), alice_before);

        // Same block as the head is still accepted.
        escrow.checkpoint(BlockInfo::new(head.ts, head.blk)).unwrap();
    }

    #[test]
    fn aggregate_supply_is_bounded() {
        let (escrow, token) = setup();
        let max = i128::MAX as u128;
        token.mint(&CAROL, max);
        token.approve(&CAROL, &ESCROW, max);
        escrow
            .create_lock(&ctx(CAROL, 0), max, T0 + 2 * WEEK)
            .unwrap();
        escrow.take_events();
        let before = escrow.snapshot();
        let bob_before = token.balance_of(&BOB);

        assert!(matches!(
            escrow.create_lock(&ctx(BOB, 10), 1, T0 + 2 * WEEK),
            Err(EbbError::Lock(LockError::ValueOverflow))
        ));
        assert_eq!(escrow.snapshot(), before);
        assert_eq!(token.balance_of(&BOB), bob_before);
        assert_eq!(escrow.supply(), max);
    }

    struct ReentrantToken {
        inner: MemoryToken,
        escrow: Mutex<Weak<VotingEscrow>>,
        outcome: Mutex<Option<(bool, u128)>>,
    }

    impl TokenLedger for ReentrantToken {
        fn transfer_from(
            &self,
            from: &Address,
            to: &Address,
            amount: u128,
        ) -> Result<(), TransferError> {
            let escrow = self.escrow.lock().upgrade();
            if let Some(escrow) = escrow {
                let nested = escrow.increase_amount(&ctx(ALICE, 1), 1);
                let rejected = matches!(nested, Err(EbbError::Access(AccessError::Reentrant)));
                *self.outcome.lock() = Some((rejected, escrow.supply()));
            }
            self.inner.transfer_from(from, to, amount)
        }

        fn transfer(&self, to: &Address, amount: u128) -> Result<(), TransferError> {
            self.inner.transfer(to, amount)
        }
    }

    #[test]
    fn callback_cannot_reenter() {
        let token = Arc::new(ReentrantToken {
            inner: MemoryToken::new(ESCROW),
            escrow: Mutex::new(Weak::new()),
            outcome: Mutex::new(None),
        });
        token.inner.mint(&ALICE, 10 * UNIT);
        token.inner.approve(&ALICE, &ESCROW, 10 * UNIT);
        let escrow = Arc::new(VotingEscrow::new(config(), token.clone(), block(0)));
        *token.escrow.lock() = Arc::downgrade(&escrow);

        escrow
            .create_lock(&ctx(ALICE, 1), UNIT, T0 + 2 * WEEK)
            .unwrap();

        // Nested mutation rejected; nested view saw the pre-call supply.
        assert_eq!(*token.outcome.lock(), Some((true, 0)));
        assert_eq!(escrow.locked(&ALICE).amount, UNIT as i128);
    }

    // ------------------------------------------------------------------
    // Allow-list and admin
    // ------------------------------------------------------------------

    #[test]
    fn contract_callers_allowed_without_checker() {
        let (escrow, _) = setup();
        let relayed = TxContext::relayed(WALLET_BAD, ALICE, block(0));
        escrow.create_lock(&relayed, UNIT, T0 + WEEK).unwrap();
    }

    #[test]
    fn checker_gates_contract_callers() {
        let (escrow, _) = setup();
        let checker: Arc<dyn WalletChecker> = Arc::new(StaticChecker::new([WALLET_OK]));
        escrow
            .commit_smart_wallet_checker(&ctx(ADMIN, 0), Some(checker))
            .unwrap();
        // Staged only: still open.
        escrow
            .create_lock(&TxContext::relayed(WALLET_BAD, ALICE, block(0)), UNIT, T0 + WEEK)
            .unwrap();
        escrow.apply_smart_wallet_checker(&ctx(ADMIN, 0)).unwrap();

        let denied = escrow.increase_amount(&TxContext::relayed(WALLET_BAD, ALICE, block(1)), UNIT);
        assert!(matches!(
            denied,
            Err(EbbError::Access(AccessError::ContractCallerDenied(_)))
        ));
        escrow
            .create_lock(&TxContext::relayed(WALLET_OK, ALICE, block(1)), UNIT, T0 + WEEK)
            .unwrap();
        // Direct callers are never checked; deposit_for skips the list.
        escrow.create_lock(&ctx(BOB, 1), UNIT, T0 + WEEK).unwrap();
        escrow
            .deposit_for(&TxContext::relayed(WALLET_BAD, ALICE, block(2)), &BOB, UNIT)
            .unwrap();
    }

    #[test]
    fn checker_admin_only() {
        let (escrow, _) = setup();
        assert!(matches!(
            escrow.commit_smart_wallet_checker(&ctx(ALICE, 0), None),
            Err(EbbError::Access(AccessError::NotAdmin))
        ));
        assert!(matches!(
            escrow.apply_smart_wallet_checker(&ctx(ALICE, 0)),
            Err(EbbError::Access(AccessError::NotAdmin))
        ));
    }

    #[test]
    fn ownership_two_step() {
        let (escrow, _) = setup();
        assert!(matches!(
            escrow.commit_transfer_ownership(&ctx(ALICE, 0), ALICE),
            Err(EbbError::Access(AccessError::NotAdmin))
        ));
        assert!(matches!(
            escrow.apply_transfer_ownership(&ctx(ADMIN, 0)),
            Err(EbbError::Access(AccessError::AdminNotSet))
        ));

        escrow.commit_transfer_ownership(&ctx(ADMIN, 0), BOB).unwrap();
        assert_eq!(escrow.future_admin(), BOB);
        assert_eq!(escrow.admin(), ADMIN);
        escrow.apply_transfer_ownership(&ctx(ADMIN, 0)).unwrap();
        assert_eq!(escrow.admin(), BOB);
        assert_eq!(
            escrow.take_events(),
            vec![
                EscrowEvent::CommitOwnership { admin: BOB },
                EscrowEvent::ApplyOwnership { admin: BOB },
            ]
        );
        assert!(matches!(
            escrow.commit_transfer_ownership(&ctx(ADMIN, 0), ADMIN),
            Err(EbbError::Access(AccessError::NotAdmin))
        ));
    }

    // ------------------------------------------------------------------
    // Queries and state
    // ------------------------------------------------------------------

    #[test]
    fn global_checkpoint_twice_is_noop() {
        let (escrow, _) = setup();
        escrow
            .create_lock(&ctx(ALICE, 0), UNIT, T0 + 3 * WEEK)
            .unwrap();
        escrow.checkpoint(block(WEEK + 5)).unwrap();
        let before = escrow.snapshot();
        let report = escrow.checkpoint(block(WEEK + 5)).unwrap();
        assert_eq!(report.from_epoch, report.to_epoch);
        assert_eq!(escrow.snapshot(), before);
    }

    #[test]
    fn future_block_query_fails() {
        let (escrow, _) = setup();
        let current = block(0);
        assert!(matches!(
            escrow.total_voting_power_at(current.height + 1, current),
            Err(EbbError::Query(QueryError::FutureBlock { .. }))
        ));
    }

    #[test]
    fn snapshot_restore_preserves_queries() {
        let (escrow, token) = setup();
        escrow
            .create_lock(&ctx(ALICE, 0), 9 * UNIT, T0 + 6 * WEEK)
            .unwrap();
        escrow.create_lock(&ctx(BOB, 30), UNIT, T0 + 2 * WEEK).unwrap();

        let restored = VotingEscrow::from_snapshot(config(), token, escrow.snapshot());
        let t = T0 + 3 * WEEK;
        assert_eq!(restored.total_voting_power(t), escrow.total_voting_power(t));
        assert_eq!(restored.voting_power_of(&ALICE, t), escrow.voting_power_of(&ALICE, t));
        assert_eq!(restored.epoch(), escrow.epoch());
        assert_eq!(restored.point_history(1), escrow.point_history(1));
    }

    #[test]
    fn metadata_comes_from_config() {
        let (escrow, _) = setup();
        assert_eq!(escrow.name(), "Vote-escrowed EBB");
        assert_eq!(escrow.symbol(), "veEBB");
        assert_eq!(escrow.version(), "ebb_1.0.0");
        assert_eq!(escrow.decimals(), 18);
        assert_eq!(escrow.config().escrow_address, ESCROW);
    }
}
