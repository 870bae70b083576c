use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// The atomic publication marker for a batch (§4.9, §6). Written last, after
/// every term tree and postings page for the version has been flushed, so
/// that a reader never sees a `.ix` file whose referenced trees are
/// incomplete. Later versions shadow earlier ones on primary-key collision
/// (`CombineTakingLatestVersion`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInfo {
    pub version_id: u64,
    pub doc_count: u64,
    pub compression: Compression,
    pub primary_key_field: Option<String>,
    pub postings_offset: u64,
    /// CRC-32 of every doc-map appended during the session that produced
    /// this batch, in append order. Not verified automatically on read —
    /// exposed for integrity tooling, the same role the teacher's
    /// segment-header checksum plays for its segment bodies.
    pub checksum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Lz4
    }
}

impl BatchInfo {
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let encoded = bincode::serialize(self)?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        bincode::deserialize(&bytes)
            .map_err(|e| Error::DataMisaligned(format!("corrupt batch-info: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.ix");
        let info = BatchInfo {
            version_id: 1,
            doc_count: 42,
            compression: Compression::Zstd,
            primary_key_field: Some("id".to_string()),
            postings_offset: 1024,
            checksum: 0xdead_beef,
        };
        info.write(&path).unwrap();
        assert_eq!(BatchInfo::read(&path).unwrap(), info);
    }

    #[test]
    fn missing_marker_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(BatchInfo::read(dir.path().join("missing.ix")).is_err());
    }
}
