use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use tracing::debug;

use cairn_types::{ChunkHash, SnapshotId};

use crate::archive::{Archive, ArchiveKind, ChunkRef};
use crate::chunker::{ChunkConfig, ChunkStream, EncodedChunk};
use crate::crypto::CryptoEngine;
use crate::erasure;
use crate::error::{CairnError, Result};
use crate::repository::Repository;
use crate::snapshot::Snapshot;

use super::concurrency::{BudgetGuard, ByteBudget};
use super::walk::{self, WalkEntry};
use super::{BackupOptions, ItemStats, ProgressEvent};

/// How the pipeline ended when no terminal error occurred.
pub(super) enum PipelineStatus {
    Completed,
    /// The progress receiver went away; partial state must be discarded.
    Cancelled,
}

enum CommitFlow {
    Continue,
    Cancelled,
}

/// Result from a transform worker.
enum ProcessedEntry {
    /// Regular file, fully chunked and transformed.
    File {
        archive: Archive,
        chunks: Vec<EncodedChunk>,
        /// Bytes acquired from the ByteBudget; the consumer releases
        /// them after committing.
        acquired_bytes: usize,
    },
    /// Directory or symlink, passed through untouched.
    Other { archive: Archive },
    /// The file disappeared between discovery and open.
    Vanished,
}

/// Message on the pipeline's result channel.
///
/// Workers send `Ok`/`WorkerErr` carrying a walk sequence index for
/// reordering; the walk thread sends `WalkErr` for fail-fast errors.
enum PipelineResult {
    Ok(usize, Box<ProcessedEntry>),
    WorkerErr(usize, CairnError),
    WalkErr(CairnError),
}

/// Chunk and transform one walk entry in a worker thread.
fn process_entry(
    entry: WalkEntry,
    config: &ChunkConfig,
    crypto: &Arc<dyn CryptoEngine>,
    budget: &ByteBudget,
    pre_acquired: usize,
) -> Result<ProcessedEntry> {
    match entry {
        WalkEntry::File {
            archive, abs_path, ..
        } => {
            // Wrap the pre-acquired bytes so a `?` bail releases them.
            let guard = BudgetGuard::from_pre_acquired(budget, pre_acquired);

            let stream = match ChunkStream::open(&abs_path, config.clone(), Arc::clone(crypto)) {
                Ok(stream) => stream,
                Err(e) if e.is_vanished_file() => {
                    debug!(path = %abs_path.display(), "file vanished before open, skipping");
                    return Ok(ProcessedEntry::Vanished);
                }
                Err(e) => return Err(e),
            };

            let chunks = stream.collect::<Result<Vec<_>>>()?;
            let acquired_bytes = guard.defuse();
            Ok(ProcessedEntry::File {
                archive,
                chunks,
                acquired_bytes,
            })
        }
        WalkEntry::Other { archive } => Ok(ProcessedEntry::Other { archive }),
    }
}

/// Upload one chunk's shards unless the index or this run already has it.
/// Returns the bytes actually stored (0 on dedup).
fn store_chunk_shards(
    repo: &Repository,
    session_uploaded: &mut HashSet<ChunkHash>,
    chunk: &EncodedChunk,
) -> Result<u64> {
    let known = {
        let index = repo.index();
        match index.get(&chunk.hash) {
            Some(entry) => {
                if entry.data_parts != chunk.data_parts
                    || entry.parity_parts != chunk.parity_parts
                {
                    return Err(CairnError::Corrupt(format!(
                        "chunk {} already stored with shard geometry ({},{}), refusing \
                         ({},{})",
                        chunk.hash,
                        entry.data_parts,
                        entry.parity_parts,
                        chunk.data_parts,
                        chunk.parity_parts,
                    )));
                }
                true
            }
            None => false,
        }
    };
    if known || session_uploaded.contains(&chunk.hash) {
        return Ok(0);
    }

    let total = erasure::total_shards(chunk.data_parts, chunk.parity_parts);
    let mut stored = 0u64;
    for (part, shard) in chunk.shards.iter().enumerate() {
        // An "already present" blob reports size 0, which is success.
        stored += repo
            .backend
            .store_chunk(&chunk.hash, part as u32, total, shard)?;
    }
    session_uploaded.insert(chunk.hash);
    Ok(stored)
}

/// Commit one processed entry in discovery order: dedup gate, shard
/// upload, stats, archive and index insertion, progress.
#[allow(clippy::too_many_arguments)]
fn commit_entry(
    entry: ProcessedEntry,
    repo: &Repository,
    snapshot: &Mutex<Snapshot>,
    snapshot_id: &SnapshotId,
    session_uploaded: &mut HashSet<ChunkHash>,
    budget: &ByteBudget,
    progress: &Sender<ProgressEvent>,
) -> Result<CommitFlow> {
    match entry {
        ProcessedEntry::Vanished => Ok(CommitFlow::Continue),

        ProcessedEntry::Other { archive } => {
            if progress
                .send(ProgressEvent::FileStarted {
                    path: archive.path.clone(),
                })
                .is_err()
            {
                return Ok(CommitFlow::Cancelled);
            }

            repo.index().add_archive(&archive, snapshot_id)?;
            let (path, totals) = {
                let mut snap = snapshot.lock().unwrap();
                match archive.kind {
                    ArchiveKind::Directory => snap.stats.dirs += 1,
                    ArchiveKind::Symlink => snap.stats.symlinks += 1,
                    ArchiveKind::File => {}
                }
                let path = archive.path.clone();
                snap.add_archive(archive);
                (path, snap.stats)
            };

            if progress
                .send(ProgressEvent::FileFinished {
                    path,
                    item: ItemStats::default(),
                    total: totals,
                })
                .is_err()
            {
                return Ok(CommitFlow::Cancelled);
            }
            Ok(CommitFlow::Continue)
        }

        ProcessedEntry::File {
            mut archive,
            chunks,
            acquired_bytes,
        } => {
            if progress
                .send(ProgressEvent::FileStarted {
                    path: archive.path.clone(),
                })
                .is_err()
            {
                budget.release(acquired_bytes);
                return Ok(CommitFlow::Cancelled);
            }

            let mut item = ItemStats {
                size: archive.size,
                ..ItemStats::default()
            };

            for chunk in &chunks {
                let stored = match store_chunk_shards(repo, session_uploaded, chunk) {
                    Ok(stored) => stored,
                    Err(e) => {
                        budget.release(acquired_bytes);
                        return Err(e);
                    }
                };

                archive.chunks.push(ChunkRef {
                    hash: chunk.hash,
                    num: chunk.num,
                    data_parts: chunk.data_parts,
                    parity_parts: chunk.parity_parts,
                    original_size: chunk.original_size,
                    encrypted_size: chunk.encrypted_size,
                });
                archive.storage_size += stored;
                item.transferred += chunk.original_size;
                item.storage_size += stored;

                let totals = {
                    let mut snap = snapshot.lock().unwrap();
                    snap.stats.transferred += chunk.original_size;
                    snap.stats.storage_size += stored;
                    snap.stats
                };

                if progress
                    .send(ProgressEvent::ChunkStored {
                        path: archive.path.clone(),
                        item,
                        total: totals,
                    })
                    .is_err()
                {
                    budget.release(acquired_bytes);
                    return Ok(CommitFlow::Cancelled);
                }
            }
            drop(chunks);
            budget.release(acquired_bytes);

            if let Err(e) = repo.index().add_archive(&archive, snapshot_id) {
                return Err(e);
            }
            let (path, totals) = {
                let mut snap = snapshot.lock().unwrap();
                snap.stats.files += 1;
                let path = archive.path.clone();
                snap.add_archive(archive);
                (path, snap.stats)
            };

            if progress
                .send(ProgressEvent::FileFinished {
                    path,
                    item,
                    total: totals,
                })
                .is_err()
            {
                return Ok(CommitFlow::Cancelled);
            }
            Ok(CommitFlow::Continue)
        }
    }
}

/// Run the two-stage pipeline.
///
/// Walk thread → bounded work channel → N transform workers → bounded
/// result channel → reorder buffer → sequential consumer (this thread).
/// The reorder buffer keeps commits in discovery order even when workers
/// finish out of order; the ByteBudget caps in-flight encoded data.
#[allow(clippy::too_many_arguments)]
pub(super) fn run_pipeline(
    repo: &Repository,
    snapshot: &Arc<Mutex<Snapshot>>,
    snapshot_id: &SnapshotId,
    cwd: &Path,
    paths: &[PathBuf],
    opts: &BackupOptions,
    chunk_config: ChunkConfig,
    crypto: Arc<dyn CryptoEngine>,
    progress: &Sender<ProgressEvent>,
) -> Result<PipelineStatus> {
    let num_workers = if opts.num_workers == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    } else {
        opts.num_workers
    };
    let budget = ByteBudget::new(opts.buffer_bytes.max(chunk_config.chunk_size as usize));

    let work_cap = num_workers * 2;
    let result_cap = num_workers * 2;

    let outcome = std::thread::scope(|s| {
        let (work_tx, work_rx) =
            crossbeam_channel::bounded::<(usize, WalkEntry, usize)>(work_cap);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<PipelineResult>(result_cap);

        let budget_ref = &budget;

        // --- Stage 1: discovery thread ---
        let walk_result_tx = result_tx.clone();
        let walk_snapshot = Arc::clone(snapshot);
        let excludes = &opts.excludes;
        let (encryption, compression) = (opts.encryption, opts.compression);
        s.spawn(move || {
            let mut seq = 0usize;
            for entry_result in walk::discover(cwd, paths, excludes, encryption, compression) {
                match entry_result {
                    Ok(entry) => {
                        {
                            let mut snap = walk_snapshot.lock().unwrap();
                            snap.stats.size += entry.size();
                        }
                        let want = match &entry {
                            WalkEntry::File { file_size, .. } => *file_size as usize,
                            WalkEntry::Other { .. } => 0,
                        };
                        let acquired = match budget_ref.acquire(want) {
                            Ok(n) => n,
                            // Poisoned: the consumer already knows why.
                            Err(_) => return,
                        };
                        if work_tx.send((seq, entry, acquired)).is_err() {
                            budget_ref.release(acquired);
                            return;
                        }
                        seq += 1;
                    }
                    Err(e) => {
                        let _ = walk_result_tx.send(PipelineResult::WalkErr(e));
                        return;
                    }
                }
            }
        });

        // --- Stage 2: transform workers ---
        for _ in 0..num_workers {
            let rx = work_rx.clone();
            let tx = result_tx.clone();
            let config = chunk_config.clone();
            let crypto = Arc::clone(&crypto);
            s.spawn(move || {
                for (seq, entry, pre_acquired) in rx {
                    let msg = match process_entry(entry, &config, &crypto, budget_ref, pre_acquired)
                    {
                        Ok(processed) => PipelineResult::Ok(seq, Box::new(processed)),
                        Err(e) => PipelineResult::WorkerErr(seq, e),
                    };
                    if tx.send(msg).is_err() {
                        return; // Consumer gone.
                    }
                }
            });
        }
        // Drop the originals so the channels close when all clones do.
        drop(work_rx);
        drop(result_tx);

        // --- Consumer with reorder buffer ---
        let mut session_uploaded: HashSet<ChunkHash> = HashSet::new();
        let mut pending: BTreeMap<usize, std::result::Result<ProcessedEntry, CairnError>> =
            BTreeMap::new();
        let mut next_expected = 0usize;
        let mut terminal: Option<Result<PipelineStatus>> = None;

        'recv: for msg in &result_rx {
            match msg {
                PipelineResult::Ok(seq, entry) => {
                    pending.insert(seq, Ok(*entry));
                }
                PipelineResult::WorkerErr(seq, e) => {
                    pending.insert(seq, Err(e));
                }
                PipelineResult::WalkErr(e) => {
                    budget.poison();
                    terminal = Some(Err(e));
                    break 'recv;
                }
            }

            while let Some(result) = pending.remove(&next_expected) {
                next_expected += 1;
                match result {
                    Ok(entry) => match commit_entry(
                        entry,
                        repo,
                        snapshot,
                        snapshot_id,
                        &mut session_uploaded,
                        &budget,
                        progress,
                    ) {
                        Ok(CommitFlow::Continue) => {}
                        Ok(CommitFlow::Cancelled) => {
                            budget.poison();
                            terminal = Some(Ok(PipelineStatus::Cancelled));
                            break 'recv;
                        }
                        Err(e) => {
                            budget.poison();
                            terminal = Some(Err(e));
                            break 'recv;
                        }
                    },
                    Err(e) => {
                        budget.poison();
                        terminal = Some(Err(e));
                        break 'recv;
                    }
                }
            }
        }

        // Unblock workers stuck on a result send, then let the scope
        // drain every thread before we return.
        drop(result_rx);

        terminal.unwrap_or(Ok(PipelineStatus::Completed))
    });

    match outcome {
        Ok(status) => Ok(status),
        Err(e) => {
            // Terminal: one final progress event carrying the error; the
            // channel closes when the caller drops its sender.
            let _ = progress.send(ProgressEvent::Error {
                message: e.to_string(),
            });
            Err(e)
        }
    }
}
