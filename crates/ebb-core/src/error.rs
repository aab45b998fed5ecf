//! Error types for the Ebb vote-escrow ledger.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("value must be greater than zero")] ZeroValue,
    #[error("withdraw old tokens first")] LockExists,
    #[error("no existing lock found")] NoLock,
    #[error("lock expired at {end}, withdraw first")] LockExpired { end: u64 },
    #[error("unlock time {unlock_time} is not in the future (now {now})")] UnlockTimeNotFuture { unlock_time: u64, now: u64 },
    #[error("lock can be {max} seconds max: unlock time {unlock_time} exceeds {limit}")] LockTooLong { unlock_time: u64, limit: u64, max: u64 },
    #[error("can only increase lock duration: {requested} <= {current}")] UnlockTimeNotIncreased { requested: u64, current: u64 },
    #[error("lock has not expired: ends at {end}, now {now}")] LockNotExpired { end: u64, now: u64 },
    #[error("value overflow")] ValueOverflow,
    #[error("block (ts={ts}, height={height}) is behind recorded history (ts={head_ts}, height={head_height})")] BlockBehindHistory { ts: u64, height: u64, head_ts: u64, head_height: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("caller is not the admin")] NotAdmin,
    #[error("no future admin committed")] AdminNotSet,
    #[error("smart contract depositors not allowed: {0}")] ContractCallerDenied(String),
    #[error("reentrant call rejected")] Reentrant,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("block {requested} is in the future (current {current})")] FutureBlock { requested: u64, current: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient balance: have {have}, need {need}")] InsufficientBalance { have: u128, need: u128 },
    #[error("insufficient allowance: have {have}, need {need}")] InsufficientAllowance { have: u128, need: u128 },
    #[error("transfer rejected: {0}")] Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("invalid length: expected 20 bytes, got {0}")] InvalidLength(usize),
}

#[derive(Error, Debug)]
pub enum EbbError {
    #[error(transparent)] Lock(#[from] LockError),
    #[error(transparent)] Access(#[from] AccessError),
    #[error(transparent)] Query(#[from] QueryError),
    #[error(transparent)] Transfer(#[from] TransferError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error("storage: {0}")] Storage(String),
}
