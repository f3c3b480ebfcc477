use crate::backup::{self, BackupOptions, ProgressEvent};
use crate::compress::CompressionCodec;
use crate::crypto::EncryptionCodec;
use crate::restore;

use super::helpers::{backup_dir, mem_repo_with_chunk_size, plain_options, write_tree};

#[test]
fn backup_and_restore_a_small_tree() {
    let (_backend, mut repo) = mem_repo_with_chunk_size(4096);
    let source = tempfile::tempdir().unwrap();
    write_tree(
        source.path(),
        &[
            ("a.txt", b"alpha contents".as_slice()),
            ("sub/b.txt", b"beta contents"),
        ],
    );

    let (outcome, events) = backup_dir(&mut repo, source.path(), &plain_options(), "small tree");
    let snapshot_id = outcome.snapshot_id.expect("snapshot saved");
    assert!(!outcome.cancelled);
    assert_eq!(outcome.stats.files, 2);
    assert_eq!(outcome.stats.dirs, 1);
    assert_eq!(outcome.stats.size, 27);
    assert_eq!(outcome.stats.transferred, 27);
    assert!(!events.is_empty());

    let target = tempfile::tempdir().unwrap();
    let stats = restore::run(&repo, &snapshot_id, target.path()).unwrap();
    assert_eq!(stats.files, 2);
    assert_eq!(
        std::fs::read(target.path().join("a.txt")).unwrap(),
        b"alpha contents"
    );
    assert_eq!(
        std::fs::read(target.path().join("sub/b.txt")).unwrap(),
        b"beta contents"
    );
}

#[test]
fn multi_chunk_file_keeps_ordinal_order() {
    let (_backend, mut repo) = mem_repo_with_chunk_size(4096);
    let source = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..20_000).map(|i| (i % 256) as u8).collect();
    write_tree(source.path(), &[("big.bin", payload.as_slice())]);

    let (outcome, events) = backup_dir(&mut repo, source.path(), &plain_options(), "big file");
    let snapshot = repo
        .load_snapshot(&outcome.snapshot_id.unwrap())
        .unwrap();
    let archive = snapshot.archives.get("big.bin").unwrap();
    assert_eq!(archive.chunks.len(), 5);
    for (i, chunk) in archive.chunks.iter().enumerate() {
        assert_eq!(chunk.num, i as u32);
    }

    // Per-file event ordering: started, then chunk progress, then finished.
    let file_events: Vec<&ProgressEvent> = events
        .iter()
        .filter(|e| match e {
            ProgressEvent::FileStarted { path }
            | ProgressEvent::ChunkStored { path, .. }
            | ProgressEvent::FileFinished { path, .. } => path == "big.bin",
            ProgressEvent::Error { .. } => false,
        })
        .collect();
    assert!(matches!(file_events.first(), Some(ProgressEvent::FileStarted { .. })));
    assert!(matches!(file_events.last(), Some(ProgressEvent::FileFinished { .. })));
    assert_eq!(file_events.len(), 2 + 5);
}

#[test]
fn second_backup_of_same_content_transfers_no_storage() {
    let (backend, mut repo) = mem_repo_with_chunk_size(4096);
    let source = tempfile::tempdir().unwrap();
    write_tree(source.path(), &[("stable.txt", b"unchanging bytes".as_slice())]);

    let (first, _) = backup_dir(&mut repo, source.path(), &plain_options(), "first");
    assert!(first.stats.storage_size > 0);
    let blobs_after_first = backend.count_with_prefix("chunks/");

    let (second, _) = backup_dir(&mut repo, source.path(), &plain_options(), "second");
    assert_eq!(second.stats.storage_size, 0, "dedup must skip the upload");
    assert_eq!(second.stats.transferred, first.stats.transferred);
    assert_eq!(backend.count_with_prefix("chunks/"), blobs_after_first);

    // Both snapshots enumerate the same chunk hashes.
    let a = repo.load_snapshot(&first.snapshot_id.unwrap()).unwrap();
    let b = repo.load_snapshot(&second.snapshot_id.unwrap()).unwrap();
    let hashes = |s: &crate::snapshot::Snapshot| {
        s.archives
            .values()
            .flat_map(|a| a.chunks.iter().map(|c| c.hash))
            .collect::<Vec<_>>()
    };
    assert_eq!(hashes(&a), hashes(&b));
}

#[test]
fn identical_files_in_one_run_upload_once() {
    let (_backend, mut repo) = mem_repo_with_chunk_size(4096);
    let source = tempfile::tempdir().unwrap();
    write_tree(
        source.path(),
        &[
            ("one.bin", b"duplicated payload".as_slice()),
            ("two.bin", b"duplicated payload"),
        ],
    );

    let (outcome, _) = backup_dir(&mut repo, source.path(), &plain_options(), "twins");
    let snapshot = repo.load_snapshot(&outcome.snapshot_id.unwrap()).unwrap();
    let one = &snapshot.archives.get("one.bin").unwrap();
    let two = &snapshot.archives.get("two.bin").unwrap();
    assert_eq!(one.chunks[0].hash, two.chunks[0].hash);

    // Only one of the two archives paid for storage.
    assert!(one.storage_size > 0 || two.storage_size > 0);
    assert_eq!(
        one.storage_size.min(two.storage_size),
        0,
        "second occurrence must deduplicate"
    );
    assert_eq!(repo.index().len(), 1);
}

#[test]
fn encrypted_compressed_coded_roundtrip() {
    let (_backend, mut repo) = mem_repo_with_chunk_size(4096);
    let source = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..10_000).map(|i| (i * 7 % 256) as u8).collect();
    write_tree(source.path(), &[("coded.bin", payload.as_slice())]);

    let opts = BackupOptions {
        compression: CompressionCodec::Gzip,
        encryption: EncryptionCodec::Aes256Gcm,
        data_parts: 2,
        parity_parts: 1,
        ..BackupOptions::default()
    };
    let (outcome, _) = backup_dir(&mut repo, source.path(), &opts, "coded");

    let target = tempfile::tempdir().unwrap();
    restore::run(&repo, &outcome.snapshot_id.unwrap(), target.path()).unwrap();
    assert_eq!(std::fs::read(target.path().join("coded.bin")).unwrap(), payload);
}

#[test]
fn dropped_progress_receiver_cancels_without_saving() {
    let (backend, mut repo) = mem_repo_with_chunk_size(4096);
    let source = tempfile::tempdir().unwrap();
    write_tree(
        source.path(),
        &[
            ("a.bin", vec![1u8; 30_000].as_slice()),
            ("b.bin", vec![2u8; 30_000].as_slice()),
        ],
    );

    let (tx, rx) = crossbeam_channel::bounded::<ProgressEvent>(0);
    drop(rx);
    let outcome = backup::run(
        &mut repo,
        "cancelled",
        source.path(),
        &[source.path().to_path_buf()],
        &plain_options(),
        tx,
    )
    .expect("cancellation is a clean return");

    assert!(outcome.cancelled);
    assert!(outcome.snapshot_id.is_none());
    assert!(repo.snapshots().is_empty());
    assert_eq!(backend.count_with_prefix("snapshots/"), 0);
    assert!(repo.index().is_empty(), "partial refs must be rolled back");
}

#[test]
fn excludes_prune_matching_entries() {
    let (_backend, mut repo) = mem_repo_with_chunk_size(4096);
    let source = tempfile::tempdir().unwrap();
    write_tree(
        source.path(),
        &[
            ("keep.txt", b"keep".as_slice()),
            ("cache/tmp.bin", b"drop"),
        ],
    );

    let opts = BackupOptions {
        excludes: vec!["cache".into()],
        ..plain_options()
    };
    let (outcome, _) = backup_dir(&mut repo, source.path(), &opts, "excluded");
    let snapshot = repo.load_snapshot(&outcome.snapshot_id.unwrap()).unwrap();
    assert!(snapshot.archives.contains_key("keep.txt"));
    assert!(!snapshot.archives.keys().any(|p| p.starts_with("cache")));
}

#[test]
fn empty_path_set_is_rejected() {
    let (_backend, mut repo) = mem_repo_with_chunk_size(4096);
    let (tx, _rx) = crossbeam_channel::unbounded();
    let err = backup::run(
        &mut repo,
        "nothing",
        std::path::Path::new("/"),
        &[],
        &plain_options(),
        tx,
    )
    .unwrap_err();
    assert!(matches!(err, crate::error::CairnError::Config(_)));
}
