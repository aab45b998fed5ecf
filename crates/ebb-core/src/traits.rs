//! Trait interfaces for collaborators of the escrow.
//!
//! - [`TokenLedger`]: the fungible token being locked (ebb-escrow ships an
//!   in-memory implementation)
//! - [`WalletChecker`]: allow-list consulted for contract callers

use crate::address::Address;
use crate::error::TransferError;

/// The fungible token locked in the escrow.
///
/// Both calls must succeed for the enclosing escrow operation to commit;
/// any error aborts the operation with no state change.
pub trait TokenLedger: Send + Sync {
    /// Move `amount` from `from` to `to`, spending the allowance `from` granted `to`.
    fn transfer_from(&self, from: &Address, to: &Address, amount: u128)
        -> Result<(), TransferError>;

    /// Move `amount` out of the escrow's own balance to `to`.
    fn transfer(&self, to: &Address, amount: u128) -> Result<(), TransferError>;
}

/// Allow-list for contract wallets.
///
/// Consulted only when the caller is not the transaction origin.
pub trait WalletChecker: Send + Sync {
    /// Whether `addr` may lock tokens.
    fn check(&self, addr: &Address) -> bool;
}
