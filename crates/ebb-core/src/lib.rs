//! # ebb-core
//! Foundation types, curve math, and collaborator traits for the Ebb
//! vote-escrow ledger.

pub mod address;
pub mod constants;
pub mod curve;
pub mod error;
pub mod traits;
pub mod types;
