use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use cairn_types::SnapshotId;

use crate::compress::{self, CompressionCodec};
use crate::crypto::{self, CryptoEngine, EncryptionCodec};
use crate::error::{CairnError, Result};
use crate::index::ChunkIndex;
use crate::snapshot::Snapshot;
use crate::storage::Backend;

/// Version written by newly created repositories. The version picks the
/// metadata compression codec, so bumping it is a format change.
pub const REPOSITORY_VERSION: u32 = 2;

/// Default plaintext chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

const MIN_CHUNK_SIZE: u32 = 4 * 1024;

/// Persisted repository metadata. Encrypted under the password but never
/// compressed: the version stored here selects the codec for everything
/// else, so this blob must be readable without knowing it.
#[derive(Debug, Serialize, Deserialize)]
struct RepositoryMeta {
    version: u32,
    chunk_size: u32,
    snapshots: Vec<SnapshotId>,
}

/// The top-level container: schema version, password-derived crypto
/// engine, backend handle, ordered snapshot list, chunk index.
///
/// The password itself is dropped after key derivation; only the derived
/// key lives for the repository's lifetime, and neither ever reaches a
/// log line or the backend.
pub struct Repository {
    version: u32,
    chunk_size: u32,
    crypto: Arc<dyn CryptoEngine>,
    pub backend: Arc<dyn Backend>,
    snapshots: Vec<SnapshotId>,
    index: Mutex<ChunkIndex>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("version", &self.version)
            .field("chunk_size", &self.chunk_size)
            .field("backend", &self.backend.location())
            .field("snapshots", &self.snapshots)
            .finish()
    }
}

impl Repository {
    /// Create a new repository behind the backend with the default chunk
    /// size. The password is fixed for the repository's lifetime.
    pub fn init(backend: Box<dyn Backend>, password: &str) -> Result<Self> {
        Self::init_with_chunk_size(backend, password, DEFAULT_CHUNK_SIZE)
    }

    /// Create a new repository with an explicit chunk size (a power of
    /// two, at least 4 KiB).
    pub fn init_with_chunk_size(
        backend: Box<dyn Backend>,
        password: &str,
        chunk_size: u32,
    ) -> Result<Self> {
        if !chunk_size.is_power_of_two() || chunk_size < MIN_CHUNK_SIZE {
            return Err(CairnError::Config(format!(
                "chunk size must be a power of two of at least {MIN_CHUNK_SIZE} bytes, \
                 got {chunk_size}"
            )));
        }

        backend.init_repository()?;

        let repo = Repository {
            version: REPOSITORY_VERSION,
            chunk_size,
            crypto: crypto::engine_for(EncryptionCodec::Aes256Gcm, password)?,
            backend: Arc::from(backend),
            snapshots: Vec::new(),
            index: Mutex::new(ChunkIndex::new()),
        };
        repo.save()?;
        debug!(location = %repo.backend.location(), "initialized repository");
        Ok(repo)
    }

    /// Open an existing repository: load and decrypt the repository
    /// metadata and the chunk index.
    pub fn open(backend: Box<dyn Backend>, password: &str) -> Result<Self> {
        let crypto = crypto::engine_for(EncryptionCodec::Aes256Gcm, password)?;

        let meta_blob = backend.load_repository()?;
        let meta_json = crypto.decrypt(&meta_blob)?;
        let meta: RepositoryMeta = serde_json::from_slice(&meta_json)
            .map_err(|e| CairnError::Corrupt(format!("corrupt repository metadata: {e}")))?;

        if meta.version > REPOSITORY_VERSION {
            return Err(CairnError::Config(format!(
                "repository version {} is newer than this client supports ({})",
                meta.version, REPOSITORY_VERSION
            )));
        }

        let index_blob = backend.load_chunk_index()?;
        let index_compressed = crypto.decrypt(&index_blob)?;
        let index_json = compress::uncompress(
            CompressionCodec::for_metadata(meta.version),
            &index_compressed,
        )
        .map_err(|e| CairnError::Corrupt(format!("corrupt chunk index: {e}")))?;
        let index = ChunkIndex::unpack(&index_json)?;

        debug!(
            location = %backend.location(),
            version = meta.version,
            snapshots = meta.snapshots.len(),
            chunks = index.len(),
            "opened repository"
        );

        Ok(Repository {
            version: meta.version,
            chunk_size: meta.chunk_size,
            crypto,
            backend: Arc::from(backend),
            snapshots: meta.snapshots,
            index: Mutex::new(index),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn snapshots(&self) -> &[SnapshotId] {
        &self.snapshots
    }

    /// The engine metadata is encrypted with.
    pub fn crypto(&self) -> Arc<dyn CryptoEngine> {
        Arc::clone(&self.crypto)
    }

    /// The engine for a per-run chunk codec. Reuses the repository's
    /// derived key instead of re-running the KDF.
    pub fn engine_for(&self, codec: EncryptionCodec) -> Result<Arc<dyn CryptoEngine>> {
        match codec {
            EncryptionCodec::None => crypto::engine_for(codec, ""),
            EncryptionCodec::Aes256Gcm => Ok(Arc::clone(&self.crypto)),
        }
    }

    /// Exclusive access to the chunk index.
    pub fn index(&self) -> MutexGuard<'_, ChunkIndex> {
        self.index.lock().unwrap()
    }

    /// Persist the chunk index and the repository metadata, in that
    /// order. A crash in between can only orphan chunks, never leave the
    /// snapshot list pointing at missing index entries.
    pub fn save(&self) -> Result<()> {
        let index_json = self.index.lock().unwrap().pack()?;
        let index_compressed = compress::compress(
            CompressionCodec::for_metadata(self.version),
            &index_json,
        )?;
        let index_blob = self.crypto.encrypt(&index_compressed)?;
        self.backend.save_chunk_index(&index_blob)?;

        let meta = RepositoryMeta {
            version: self.version,
            chunk_size: self.chunk_size,
            snapshots: self.snapshots.clone(),
        };
        let meta_blob = self.crypto.encrypt(&serde_json::to_vec(&meta)?)?;
        self.backend.save_repository(&meta_blob)?;
        Ok(())
    }

    /// Seal a completed snapshot: write its blob, register its ID, and
    /// persist index and metadata.
    pub fn add_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let blob = snapshot.to_blob(self.version, self.crypto.as_ref())?;
        self.backend.save_snapshot(&snapshot.id, &blob)?;
        if !self.snapshots.contains(&snapshot.id) {
            self.snapshots.push(snapshot.id.clone());
        }
        self.save()
    }

    /// Load and decrypt a snapshot by ID.
    pub fn load_snapshot(&self, id: &SnapshotId) -> Result<Snapshot> {
        if !self.snapshots.contains(id) {
            return Err(CairnError::SnapshotMissing(id.to_string()));
        }
        let blob = self.backend.load_snapshot(id)?;
        Snapshot::from_blob(&blob, self.version, self.crypto.as_ref())
    }

    /// Remove a snapshot: drop its back-references from the index, persist
    /// the new state, then delete the shard blobs of any chunk that lost
    /// its last reference.
    ///
    /// Deletion happens after the save so that a crash mid-way leaves
    /// orphaned blobs (reclaimable by a sweep), never dangling references.
    pub fn remove_snapshot(&mut self, id: &SnapshotId) -> Result<()> {
        let pos = self
            .snapshots
            .iter()
            .position(|s| s == id)
            .ok_or_else(|| CairnError::SnapshotMissing(id.to_string()))?;

        let orphaned = self.index.lock().unwrap().remove_snapshot(id);
        self.snapshots.remove(pos);
        self.save()?;

        let mut deleted = 0usize;
        for chunk in &orphaned {
            let total = crate::erasure::total_shards(chunk.data_parts, chunk.parity_parts);
            let stored = crate::erasure::stored_shards(chunk.data_parts, chunk.parity_parts);
            for part in 0..stored {
                self.backend.delete_chunk(&chunk.hash, part, total)?;
                deleted += 1;
            }
        }
        if !orphaned.is_empty() {
            debug!(
                snapshot = %id,
                chunks = orphaned.len(),
                shards = deleted,
                "deleted orphaned chunks"
            );
        }

        // The snapshot blob itself has no delete operation on the backend
        // contract; it is unreachable once dropped from the metadata and
        // left for an external sweep.
        Ok(())
    }
}
