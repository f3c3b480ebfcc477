use std::path::Path;

use chrono::Utc;

use cairn_types::ChunkHash;

use crate::archive::{Archive, ArchiveKind, ChunkRef};
use crate::backup::{self, BackupOptions, BackupOutcome, ProgressEvent};
use crate::compress::CompressionCodec;
use crate::crypto::EncryptionCodec;
use crate::repository::Repository;
use crate::storage::memory::MemoryBackend;

pub const TEST_PASSWORD: &str = "test-password";

/// A repository on a fresh in-memory backend, plus a raw handle onto its
/// blobs for inspection.
pub fn mem_repo() -> (MemoryBackend, Repository) {
    mem_repo_with_chunk_size(crate::repository::DEFAULT_CHUNK_SIZE)
}

pub fn mem_repo_with_chunk_size(chunk_size: u32) -> (MemoryBackend, Repository) {
    let backend = MemoryBackend::new();
    let repo =
        Repository::init_with_chunk_size(Box::new(backend.handle()), TEST_PASSWORD, chunk_size)
            .expect("failed to init test repo");
    (backend, repo)
}

/// Materialize a small tree of files under `dir`.
pub fn write_tree(dir: &Path, files: &[(&str, &[u8])]) {
    for (rel, content) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}

/// Run a backup with a drained progress channel, returning the outcome
/// and every event that was emitted.
pub fn backup_paths(
    repo: &mut Repository,
    cwd: &Path,
    paths: &[std::path::PathBuf],
    opts: &BackupOptions,
    description: &str,
) -> (BackupOutcome, Vec<ProgressEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let drainer = std::thread::spawn(move || rx.iter().collect::<Vec<_>>());
    let outcome = backup::run(repo, description, cwd, paths, opts, tx)
        .expect("backup failed");
    let events = drainer.join().unwrap();
    (outcome, events)
}

pub fn backup_dir(
    repo: &mut Repository,
    dir: &Path,
    opts: &BackupOptions,
    description: &str,
) -> (BackupOutcome, Vec<ProgressEvent>) {
    backup_paths(repo, dir, &[dir.to_path_buf()], opts, description)
}

pub fn plain_options() -> BackupOptions {
    BackupOptions {
        compression: CompressionCodec::None,
        encryption: EncryptionCodec::None,
        ..BackupOptions::default()
    }
}

/// A file archive whose chunk refs are derived from content strings.
pub fn file_archive(path: &str, contents: &[&[u8]], data_parts: u32, parity_parts: u32) -> Archive {
    let chunks = contents
        .iter()
        .enumerate()
        .map(|(i, content)| ChunkRef {
            hash: ChunkHash::compute(content),
            num: i as u32,
            data_parts,
            parity_parts,
            original_size: content.len() as u64,
            encrypted_size: content.len() as u64 + 28,
        })
        .collect();
    Archive {
        path: path.to_string(),
        kind: ArchiveKind::File,
        mode: 0o644,
        uid: 1000,
        gid: 1000,
        mod_time: Utc::now(),
        size: contents.iter().map(|c| c.len() as u64).sum(),
        storage_size: 0,
        encrypted: EncryptionCodec::None,
        compressed: CompressionCodec::None,
        chunks,
        link_target: None,
    }
}
