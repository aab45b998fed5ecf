//! # ebb-escrow: The vote-escrow service.
//!
//! Composes the ledger into a service that accepts lock operations:
//! - [`escrow::VotingEscrow`]: lock table, lock operations, queries, admin
//! - [`events::EscrowEvent`]: deposit, withdrawal, and supply records
//! - [`token::MemoryToken`]: in-memory token ledger for tests and the CLI
//! - [`snapshot`]: bincode persistence of escrow and token state
//! - [`config::EscrowConfig`]: escrow configuration

pub mod config;
pub mod escrow;
pub mod events;
pub mod snapshot;
pub mod token;

pub use config::EscrowConfig;
pub use escrow::{EscrowSnapshot, VotingEscrow};
pub use events::EscrowEvent;
pub use token::{MemoryToken, StaticChecker, TokenSnapshot};
