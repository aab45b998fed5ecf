//! # ebb-ledger: Voting-power history and its checkpoint engine.
//!
//! All calculations use integer arithmetic only for determinism.
//!
//! The ledger keeps a piecewise-linear history of aggregate and per-account
//! voting power without ever iterating over the account set:
//! - **Global history**: one [`Point`](ebb_core::types::Point) per epoch,
//!   with a weekly point recorded for every week between checkpoints.
//! - **Slope-change schedule**: sparse map from a week-aligned unlock time to
//!   the slope that disappears when the locks ending there expire.
//! - **Per-account history**: one point per lock-affecting operation.
//! - **Checkpoint engine**: replays the global curve week by week up to the
//!   current block, then folds in one account's lock change.
//! - **Query engine**: point-in-time and point-in-block lookups by bisection.

pub mod checkpoint;
pub mod history;
pub mod query;

pub use checkpoint::CheckpointReport;
pub use history::{GlobalHistory, LedgerStore, SlopeSchedule, UserHistory};
