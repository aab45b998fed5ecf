//! Escrow configuration.
//!
//! Provides [`EscrowConfig`] with defaults for token metadata, the escrow's
//! own address, the initial admin, and the data directory used for
//! snapshots.

use std::path::PathBuf;

use ebb_core::address::Address;
use ebb_core::constants::{DEFAULT_DECIMALS, DEFAULT_NAME, DEFAULT_SYMBOL, DEFAULT_VERSION};

/// Configuration for an escrow instance.
#[derive(Debug, Clone)]
pub struct EscrowConfig {
    /// Display name of the vote-escrowed token.
    pub name: String,
    /// Symbol of the vote-escrowed token.
    pub symbol: String,
    /// Version string.
    pub version: String,
    /// Decimals, mirroring the locked token.
    pub decimals: u8,
    /// Address the escrow holds locked tokens under.
    pub escrow_address: Address,
    /// Initial admin.
    pub admin: Address,
    /// Root directory for persisted state.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "ebb_ledger=debug").
    pub log_level: String,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ebb");

        Self {
            name: DEFAULT_NAME.to_string(),
            symbol: DEFAULT_SYMBOL.to_string(),
            version: DEFAULT_VERSION.to_string(),
            decimals: DEFAULT_DECIMALS,
            escrow_address: Address([0xEE; 20]),
            admin: Address::ZERO,
            data_dir,
            log_level: "info".to_string(),
        }
    }
}

impl EscrowConfig {
    /// Path of the escrow snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("escrow.snapshot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metadata() {
        let cfg = EscrowConfig::default();
        assert_eq!(cfg.name, DEFAULT_NAME);
        assert_eq!(cfg.symbol, "veEBB");
        assert_eq!(cfg.decimals, 18);
    }

    #[test]
    fn default_log_level_is_info() {
        assert_eq!(EscrowConfig::default().log_level, "info");
    }

    #[test]
    fn default_data_dir_ends_with_ebb() {
        let cfg = EscrowConfig::default();
        assert!(
            cfg.data_dir.ends_with("ebb"),
            "data_dir should end with 'ebb': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn snapshot_path_appends_file_name() {
        let cfg = EscrowConfig {
            data_dir: PathBuf::from("/tmp/ebb-test"),
            ..EscrowConfig::default()
        };
        assert_eq!(
            cfg.snapshot_path(),
            PathBuf::from("/tmp/ebb-test/escrow.snapshot")
        );
    }

    #[test]
    fn escrow_address_is_not_zero() {
        assert!(!EscrowConfig::default().escrow_address.is_zero());
    }
}
