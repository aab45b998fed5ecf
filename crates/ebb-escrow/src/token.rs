//! In-memory collaborators: a token ledger and a static allow-list.
//!
//! [`MemoryToken`] keeps balances and allowances in maps behind a mutex. It
//! is suitable for tests and the CLI simulator; it has no persistence of its
//! own beyond [`TokenSnapshot`].

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use ebb_core::address::Address;
use ebb_core::error::TransferError;
use ebb_core::traits::{TokenLedger, WalletChecker};

/// Serializable token state.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TokenSnapshot {
    /// Account balances.
    pub balances: HashMap<Address, u128>,
    /// `(owner, spender) → remaining allowance`.
    pub allowances: HashMap<(Address, Address), u128>,
}

/// Token ledger kept in memory.
///
/// `holder` is the account [`TokenLedger::transfer`] pays out of, i.e. the
/// escrow's own address.
pub struct MemoryToken {
    holder: Address,
    state: Mutex<TokenSnapshot>,
}

impl MemoryToken {
    /// Create an empty token whose outgoing transfers debit `holder`.
    pub fn new(holder: Address) -> Self {
        Self::from_snapshot(holder, TokenSnapshot::default())
    }

    /// Restore a token from a snapshot.
    pub fn from_snapshot(holder: Address, snapshot: TokenSnapshot) -> Self {
        Self {
            holder,
            state: Mutex::new(snapshot),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> TokenSnapshot {
        self.state.lock().clone()
    }

    /// Credit `amount` to `to` out of thin air.
    pub fn mint(&self, to: &Address, amount: u128) {
        *self.state.lock().balances.entry(*to).or_default() += amount;
    }

    /// Set `spender`'s allowance on `owner`'s balance.
    pub fn approve(&self, owner: &Address, spender: &Address, amount: u128) {
        self.state.lock().allowances.insert((*owner, *spender), amount);
    }

    /// Balance of `who`.
    pub fn balance_of(&self, who: &Address) -> u128 {
        self.state.lock().balances.get(who).copied().unwrap_or(0)
    }

    /// Remaining allowance of `spender` on `owner`.
    pub fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.state
            .lock()
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }
}

/// Move `amount` between balances, failing without side effects.
fn move_balance(
    state: &mut TokenSnapshot,
    from: &Address,
    to: &Address,
    amount: u128,
) -> Result<(), TransferError> {
    let have = state.balances.get(from).copied().unwrap_or(0);
    if have < amount {
        return Err(TransferError::InsufficientBalance { have, need: amount });
    }
    state.balances.insert(*from, have - amount);
    *state.balances.entry(*to).or_default() += amount;
    Ok(())
}

impl TokenLedger for MemoryToken {
    fn transfer_from(
        &self,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        let key = (*from, *to);
        let allowed = state.allowances.get(&key).copied().unwrap_or(0);
        if allowed < amount {
            return Err(TransferError::InsufficientAllowance {
                have: allowed,
                need: amount,
            });
        }
        move_balance(&mut state, from, to, amount)?;
        state.allowances.insert(key, allowed - amount);
        Ok(())
    }

    fn transfer(&self, to: &Address, amount: u128) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        move_balance(&mut state, &self.holder, to, amount)
    }
}

/// Allow-list with a fixed set of permitted contract wallets.
#[derive(Debug, Clone, Default)]
pub struct StaticChecker {
    allowed: HashSet<Address>,
}

impl StaticChecker {
    pub fn new(allowed: impl IntoIterator<Item = Address>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl WalletChecker for StaticChecker {
    fn check(&self, addr: &Address) -> bool {
        self.allowed.contains(addr)
    }
}
