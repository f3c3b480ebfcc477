use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cairn_types::SnapshotId;

use crate::archive::Archive;
use crate::compress::{self, CompressionCodec};
use crate::crypto::CryptoEngine;
use crate::error::{CairnError, Result};

/// A point-in-time collection of archives. Mutable while the backup
/// pipeline runs (behind its mutex), sealed once saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub date: DateTime<Utc>,
    pub description: String,
    pub stats: Stats,
    /// Relative archive path → archive. A later insert for the same
    /// normalized path replaces the earlier record.
    #[serde(rename = "items")]
    pub archives: BTreeMap<String, Archive>,
}

/// Aggregate statistics for a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    /// Logical bytes discovered.
    pub size: u64,
    /// Shard bytes actually uploaded (0 for deduplicated content).
    pub storage_size: u64,
    /// Plaintext bytes pushed through the chunk pipeline.
    pub transferred: u64,
}

impl Snapshot {
    pub fn new(description: &str) -> Self {
        Self {
            id: SnapshotId::generate(),
            date: Utc::now(),
            description: description.to_string(),
            stats: Stats::default(),
            archives: BTreeMap::new(),
        }
    }

    /// Insert an archive, replacing any earlier record at the same path.
    pub fn add_archive(&mut self, archive: Archive) {
        self.archives.insert(archive.path.clone(), archive);
    }

    /// A copy with a fresh ID and timestamp but the same description,
    /// archives, and stats. Used to rewrite history after compaction.
    pub fn clone_with_new_id(&self) -> Self {
        Self {
            id: SnapshotId::generate(),
            date: Utc::now(),
            description: self.description.clone(),
            stats: self.stats,
            archives: self.archives.clone(),
        }
    }

    /// Serialize for storage: JSON → version-keyed compression →
    /// encryption under the repository password.
    pub fn to_blob(&self, repository_version: u32, crypto: &dyn CryptoEngine) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let compressed =
            compress::compress(CompressionCodec::for_metadata(repository_version), &json)?;
        crypto.encrypt(&compressed)
    }

    /// Inverse of `to_blob`. A decryption failure is `WrongPassword`; a
    /// decompression or parse failure is `Corrupt`.
    pub fn from_blob(
        data: &[u8],
        repository_version: u32,
        crypto: &dyn CryptoEngine,
    ) -> Result<Self> {
        let compressed = crypto.decrypt(data)?;
        let json = compress::uncompress(
            CompressionCodec::for_metadata(repository_version),
            &compressed,
        )
        .map_err(|e| CairnError::Corrupt(format!("corrupt snapshot: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| CairnError::Corrupt(format!("corrupt snapshot: {e}")))
    }
}
