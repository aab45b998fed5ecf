//! Escrow events.
//!
//! Events are notifications for observers; nothing inside the escrow reads
//! them back.

use serde::{Deserialize, Serialize};

use ebb_core::address::Address;
use ebb_core::types::DepositKind;

/// A record of something the escrow did.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EscrowEvent {
    /// Tokens locked or a lock modified.
    Deposit {
        provider: Address,
        value: u128,
        locktime: u64,
        kind: DepositKind,
        ts: u64,
    },
    /// An expired lock was withdrawn.
    Withdraw {
        provider: Address,
        value: u128,
        ts: u64,
    },
    /// Total locked supply changed.
    Supply { prev_supply: u128, supply: u128 },
    /// A new admin was committed.
    CommitOwnership { admin: Address },
    /// The committed admin took over.
    ApplyOwnership { admin: Address },
}
