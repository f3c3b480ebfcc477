use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use cairn_types::{ChunkHash, SnapshotId};

use crate::archive::Archive;
use crate::error::{CairnError, Result};

/// The authoritative dedup ledger: content hash → shard geometry plus the
/// set of `(snapshot, archive path)` pairs that reference the chunk.
///
/// A chunk is physically deleted only when its back-reference set becomes
/// empty; the backend is never consulted for existence during dedup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkIndex {
    chunks: BTreeMap<ChunkHash, ChunkIndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkIndexEntry {
    pub data_parts: u32,
    pub parity_parts: u32,
    pub back_refs: BTreeSet<BackRef>,
}

/// One reference keeping a chunk alive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackRef {
    pub snapshot: SnapshotId,
    pub path: String,
}

/// A chunk whose last back-reference just went away, with the geometry
/// needed to name every shard blob for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedChunk {
    pub hash: ChunkHash,
    pub data_parts: u32,
    pub parity_parts: u32,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.chunks.contains_key(hash)
    }

    pub fn get(&self, hash: &ChunkHash) -> Option<&ChunkIndexEntry> {
        self.chunks.get(hash)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &ChunkHash> {
        self.chunks.keys()
    }

    /// Register every chunk of an archive under `(snapshot, path)`.
    ///
    /// Returns the hashes that were not previously in the index, which is
    /// the set the pipeline must actually upload. `(data, parity)` is an
    /// immutable property per hash; re-registering a hash with different
    /// shard geometry is rejected.
    pub fn add_archive(
        &mut self,
        archive: &Archive,
        snapshot_id: &SnapshotId,
    ) -> Result<Vec<ChunkHash>> {
        let mut introduced = Vec::new();
        for chunk in &archive.chunks {
            match self.chunks.get_mut(&chunk.hash) {
                Some(entry) => {
                    if entry.data_parts != chunk.data_parts
                        || entry.parity_parts != chunk.parity_parts
                    {
                        return Err(CairnError::Corrupt(format!(
                            "chunk {} re-registered with shard geometry ({},{}) but the index \
                             records ({},{})",
                            chunk.hash,
                            chunk.data_parts,
                            chunk.parity_parts,
                            entry.data_parts,
                            entry.parity_parts,
                        )));
                    }
                    entry.back_refs.insert(BackRef {
                        snapshot: snapshot_id.clone(),
                        path: archive.path.clone(),
                    });
                }
                None => {
                    let mut back_refs = BTreeSet::new();
                    back_refs.insert(BackRef {
                        snapshot: snapshot_id.clone(),
                        path: archive.path.clone(),
                    });
                    self.chunks.insert(
                        chunk.hash,
                        ChunkIndexEntry {
                            data_parts: chunk.data_parts,
                            parity_parts: chunk.parity_parts,
                            back_refs,
                        },
                    );
                    introduced.push(chunk.hash);
                }
            }
        }
        Ok(introduced)
    }

    /// Drop every back-reference belonging to `snapshot_id`. Entries whose
    /// back-reference set becomes empty are removed and returned so the
    /// caller can delete their shards from the backend.
    pub fn remove_snapshot(&mut self, snapshot_id: &SnapshotId) -> Vec<OrphanedChunk> {
        let mut orphaned = Vec::new();
        self.chunks.retain(|hash, entry| {
            entry.back_refs.retain(|r| &r.snapshot != snapshot_id);
            if entry.back_refs.is_empty() {
                orphaned.push(OrphanedChunk {
                    hash: *hash,
                    data_parts: entry.data_parts,
                    parity_parts: entry.parity_parts,
                });
                false
            } else {
                true
            }
        });
        debug!(
            snapshot = %snapshot_id,
            orphaned = orphaned.len(),
            remaining = self.chunks.len(),
            "removed snapshot back-references"
        );
        orphaned
    }

    /// Canonical serialization. Entries are ordered by hash and back-refs
    /// by (snapshot, path), so equal indexes always produce equal bytes.
    pub fn pack(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CairnError::Corrupt(format!("corrupt chunk index: {e}")))
    }
}
