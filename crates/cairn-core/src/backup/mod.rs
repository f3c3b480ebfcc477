mod concurrency;
mod pipeline;
mod walk;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use tracing::debug;

use cairn_types::SnapshotId;

use crate::chunker::ChunkConfig;
use crate::compress::CompressionCodec;
use crate::crypto::EncryptionCodec;
use crate::error::{CairnError, Result};
use crate::repository::Repository;
use crate::snapshot::{Snapshot, Stats};

use pipeline::PipelineStatus;

/// Per-run knobs for a backup.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub compression: CompressionCodec,
    pub encryption: EncryptionCodec,
    /// Data shards per chunk; clamped to at least 1.
    pub data_parts: u32,
    /// Parity shards per chunk; 0 disables erasure coding.
    pub parity_parts: u32,
    /// Gitignore-style exclusion patterns.
    pub excludes: Vec<String>,
    /// Transform worker count; 0 means one per CPU core.
    pub num_workers: usize,
    /// Cap on in-flight encoded bytes between discovery and commit.
    pub buffer_bytes: usize,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            compression: CompressionCodec::None,
            encryption: EncryptionCodec::Aes256Gcm,
            data_parts: 1,
            parity_parts: 0,
            excludes: Vec::new(),
            num_workers: 0,
            buffer_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Byte counters for the archive currently being processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemStats {
    pub size: u64,
    pub transferred: u64,
    pub storage_size: u64,
}

/// Events on the progress channel.
///
/// Sends block when the consumer is slow; that is the pipeline's
/// backpressure. Dropping the receiver cancels the backup.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    FileStarted {
        path: String,
    },
    ChunkStored {
        path: String,
        item: ItemStats,
        total: Stats,
    },
    FileFinished {
        path: String,
        item: ItemStats,
        total: Stats,
    },
    /// Terminal failure; the pipeline sends this once and shuts down.
    Error {
        message: String,
    },
}

/// What a backup run produced.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    /// `None` when the run was cancelled and nothing was saved.
    pub snapshot_id: Option<SnapshotId>,
    pub stats: Stats,
    pub cancelled: bool,
}

/// Back up `paths` into a new snapshot.
///
/// Discovery and chunking run concurrently; progress events stream to
/// `progress`. On a clean drain the snapshot, chunk index, and
/// repository metadata are persisted, in that order. On cancellation
/// (dropped progress receiver) or any terminal error, nothing is saved
/// and the snapshot's back-references are rolled out of the in-memory
/// index.
pub fn run(
    repo: &mut Repository,
    description: &str,
    cwd: &Path,
    paths: &[PathBuf],
    opts: &BackupOptions,
    progress: Sender<ProgressEvent>,
) -> Result<BackupOutcome> {
    if paths.is_empty() {
        return Err(CairnError::Config("no source paths specified".into()));
    }

    let snapshot = Arc::new(Mutex::new(Snapshot::new(description)));
    let snapshot_id = snapshot.lock().unwrap().id.clone();

    let crypto = repo.engine_for(opts.encryption)?;
    let chunk_config = ChunkConfig {
        chunk_size: repo.chunk_size(),
        compression: opts.compression,
        data_parts: opts.data_parts.max(1),
        parity_parts: opts.parity_parts,
    };

    let status = match pipeline::run_pipeline(
        repo,
        &snapshot,
        &snapshot_id,
        cwd,
        paths,
        opts,
        chunk_config,
        crypto,
        &progress,
    ) {
        Ok(status) => status,
        Err(e) => {
            // Keep the in-memory index consistent with persisted state:
            // this snapshot was never saved, so its back-references go.
            repo.index().remove_snapshot(&snapshot_id);
            return Err(e);
        }
    };

    match status {
        PipelineStatus::Cancelled => {
            repo.index().remove_snapshot(&snapshot_id);
            let stats = snapshot.lock().unwrap().stats;
            debug!(snapshot = %snapshot_id, "backup cancelled, partial state discarded");
            Ok(BackupOutcome {
                snapshot_id: None,
                stats,
                cancelled: true,
            })
        }
        PipelineStatus::Completed => {
            let snapshot = Arc::try_unwrap(snapshot)
                .map_err(|_| CairnError::Other("pipeline left the snapshot shared".into()))?
                .into_inner()
                .unwrap();
            repo.add_snapshot(&snapshot)?;
            debug!(
                snapshot = %snapshot.id,
                files = snapshot.stats.files,
                size = snapshot.stats.size,
                storage = snapshot.stats.storage_size,
                "backup complete"
            );
            Ok(BackupOutcome {
                snapshot_id: Some(snapshot.id.clone()),
                stats: snapshot.stats,
                cancelled: false,
            })
        }
    }
}
