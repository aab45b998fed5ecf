//! Integration test suite for the Ebb vote-escrow.
//!
//! Tests drive a full [`ebb_escrow::VotingEscrow`] backed by an in-memory
//! token and check the observable voting-power properties across accounts,
//! long idle gaps, and restarts from persisted state.

pub mod helpers;
