//! Shared test helpers for integration tests.

use std::sync::Arc;

use ebb_core::address::Address;
use ebb_core::constants::WEEK;
use ebb_core::types::{BlockInfo, TxContext};
use ebb_escrow::{EscrowConfig, MemoryToken, VotingEscrow};

/// Week-aligned start of every test history.
pub const T0: u64 = 2_800 * WEEK;

/// Block height at [`T0`].
pub const H0: u64 = 1_000;

/// Seconds per block in test chains.
pub const BLOCK_SECS: u64 = 12;

/// One whole token at 18 decimals.
pub const UNIT: u128 = 1_000_000_000_000_000_000;

/// Deterministic address from a seed byte.
pub fn addr(seed: u8) -> Address {
    Address([seed; 20])
}

/// Block observed at timestamp `t` on a chain with a fixed block time.
pub fn block_at(t: u64) -> BlockInfo {
    BlockInfo::new(t, H0 + (t - T0) / BLOCK_SECS)
}

/// Escrow plus the token it holds, seeded at [`T0`].
pub struct Harness {
    pub escrow: Arc<VotingEscrow>,
    pub token: Arc<MemoryToken>,
    pub config: EscrowConfig,
}

impl Harness {
    pub fn new() -> Self {
        let config = EscrowConfig {
            admin: addr(0xAD),
            escrow_address: addr(0xEE),
            ..EscrowConfig::default()
        };
        let token = Arc::new(MemoryToken::new(config.escrow_address));
        let escrow = Arc::new(VotingEscrow::new(
            config.clone(),
            token.clone(),
            block_at(T0),
        ));
        Self {
            escrow,
            token,
            config,
        }
    }

    /// Mint `amount` to `who` and let the escrow pull it.
    pub fn fund(&self, who: &Address, amount: u128) {
        let escrow = self.config.escrow_address;
        self.token.mint(who, amount);
        let allowance = self.token.allowance(who, &escrow);
        self.token.approve(who, &escrow, allowance + amount);
    }

    /// Direct call from `who` at timestamp `t`.
    pub fn ctx(&self, who: &Address, t: u64) -> TxContext {
        TxContext::direct(*who, block_at(t))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
