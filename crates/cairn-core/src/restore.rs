use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use cairn_types::{ChunkHash, SnapshotId};

use crate::archive::{Archive, ChunkRef};
use crate::compress;
use crate::crypto::CryptoEngine;
use crate::erasure;
use crate::error::{CairnError, Result};
use crate::repository::Repository;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub bytes: u64,
}

/// Restore a snapshot into `target`, creating it if needed.
pub fn run(repo: &Repository, snapshot_id: &SnapshotId, target: &Path) -> Result<RestoreStats> {
    let snapshot = repo.load_snapshot(snapshot_id)?;
    restore_snapshot(repo, &snapshot, target)
}

/// Restore an already-loaded snapshot into `target`.
///
/// Archives are visited in path order, so directories appear before
/// their contents. Each chunk is reassembled from whatever shards
/// survive, decrypted, uncompressed, and verified against its content
/// address before a byte is written.
pub fn restore_snapshot(
    repo: &Repository,
    snapshot: &Snapshot,
    target: &Path,
) -> Result<RestoreStats> {
    fs::create_dir_all(target)?;
    let mut stats = RestoreStats::default();

    for archive in snapshot.archives.values() {
        let dest = destination(target, &archive.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if archive.is_dir() {
            fs::create_dir_all(&dest)?;
            apply_mode(&dest, archive.mode);
            stats.dirs += 1;
        } else if archive.is_symlink() {
            restore_symlink(archive, &dest)?;
            stats.symlinks += 1;
        } else {
            stats.bytes += restore_file(repo, archive, &dest)?;
            stats.files += 1;
        }
        apply_ownership(&dest, archive);
    }

    debug!(
        snapshot = %snapshot.id,
        files = stats.files,
        dirs = stats.dirs,
        symlinks = stats.symlinks,
        bytes = stats.bytes,
        "restore complete"
    );
    Ok(stats)
}

/// Map an archive path under the target directory. Absolute archive
/// paths (sources that escaped the backup working directory) are
/// re-rooted inside the target.
fn destination(target: &Path, archive_path: &str) -> PathBuf {
    target.join(archive_path.trim_start_matches('/'))
}

#[cfg(unix)]
fn restore_symlink(archive: &Archive, dest: &Path) -> Result<()> {
    let link_target = archive.link_target.as_deref().ok_or_else(|| {
        CairnError::Corrupt(format!("symlink archive '{}' has no target", archive.path))
    })?;
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(link_target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn restore_symlink(archive: &Archive, _dest: &Path) -> Result<()> {
    warn!(path = %archive.path, "skipping symlink restore on this platform");
    Ok(())
}

fn restore_file(repo: &Repository, archive: &Archive, dest: &Path) -> Result<u64> {
    let crypto = repo.engine_for(archive.encrypted)?;
    let mut out = fs::File::create(dest)?;
    let mut written = 0u64;

    for (i, chunk) in archive.chunks.iter().enumerate() {
        if chunk.num != i as u32 {
            return Err(CairnError::Corrupt(format!(
                "archive '{}' chunk ordinals out of order: expected {i}, got {}",
                archive.path, chunk.num
            )));
        }
        let plaintext = read_chunk(repo, archive, chunk, crypto.as_ref())?;
        out.write_all(&plaintext)?;
        written += plaintext.len() as u64;
    }

    out.flush()?;
    if let Err(e) = out.set_modified(archive.mod_time.into()) {
        warn!(path = %archive.path, error = %e, "could not restore mtime");
    }
    drop(out);
    apply_mode(dest, archive.mode);
    Ok(written)
}

/// Fetch, reconstruct, decrypt, uncompress, and verify one chunk.
fn read_chunk(
    repo: &Repository,
    archive: &Archive,
    chunk: &ChunkRef,
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let total = chunk.total_shards();
    let stored = chunk.stored_shards();

    let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(stored as usize);
    let mut missing = 0u32;
    for part in 0..stored {
        match repo.backend.load_chunk(&chunk.hash, part, total) {
            Ok(data) => shards.push(Some(data)),
            Err(e) => {
                missing += 1;
                debug!(chunk = %chunk.hash, part, error = %e, "shard unavailable");
                shards.push(None);
            }
        }
    }
    if missing > 0 {
        warn!(
            chunk = %chunk.hash,
            missing,
            stored,
            "reconstructing chunk from partial shards"
        );
    }

    let encrypted = erasure::reconstruct(
        &chunk.hash,
        shards,
        chunk.data_parts,
        chunk.parity_parts,
        chunk.encrypted_size,
    )?;
    let compressed = crypto.decrypt(&encrypted)?;
    let plaintext = compress::uncompress(archive.compressed, &compressed)?;

    if ChunkHash::compute(&plaintext) != chunk.hash {
        return Err(CairnError::Corrupt(format!(
            "chunk {} failed content verification after reassembly",
            chunk.hash
        )));
    }
    Ok(plaintext)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), error = %e, "could not restore mode");
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) {}

#[cfg(unix)]
fn apply_ownership(path: &Path, archive: &Archive) {
    // Only root can usually chown; failure is expected and harmless.
    if let Err(e) = std::os::unix::fs::lchown(path, Some(archive.uid), Some(archive.gid)) {
        debug!(path = %path.display(), error = %e, "could not restore ownership");
    }
}

#[cfg(not(unix))]
fn apply_ownership(_path: &Path, _archive: &Archive) {}
