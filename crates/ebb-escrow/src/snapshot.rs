//! Snapshot persistence.
//!
//! State is written as a single bincode blob (standard config). Writes go to
//! a temporary sibling file first and are renamed into place, so a crash
//! never leaves a truncated snapshot behind.

use std::fs;
use std::path::Path;

use ebb_core::error::EbbError;

/// Encode `value` and write it to `path`, creating parent directories.
pub fn save<T: bincode::Encode>(path: &Path, value: &T) -> Result<(), EbbError> {
    let bytes = bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| EbbError::Storage(format!("encode snapshot: {e}")))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| EbbError::Storage(format!("create {}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)
        .map_err(|e| EbbError::Storage(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| EbbError::Storage(format!("rename to {}: {e}", path.display())))?;
    Ok(())
}

/// Read and decode a value previously written by [`save`].
pub fn load<T: bincode::Decode<()>>(path: &Path) -> Result<T, EbbError> {
    let bytes = fs::read(path)
        .map_err(|e| EbbError::Storage(format!("read {}: {e}", path.display())))?;
    let (value, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| EbbError::Storage(format!("decode snapshot: {e}")))?;
    Ok(value)
}
