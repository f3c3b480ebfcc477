use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use tracing::warn;

use crate::archive::{Archive, ArchiveKind};
use crate::compress::CompressionCodec;
use crate::crypto::EncryptionCodec;
use crate::error::{CairnError, Result};

/// One discovered filesystem entry headed into the pipeline.
pub(super) enum WalkEntry {
    /// A regular file that still needs chunking.
    File {
        archive: Archive,
        abs_path: PathBuf,
        file_size: u64,
    },
    /// A directory or symlink, complete as-is.
    Other { archive: Archive },
}

impl WalkEntry {
    pub(super) fn size(&self) -> u64 {
        match self {
            WalkEntry::File { file_size, .. } => *file_size,
            WalkEntry::Other { archive } => archive.size,
        }
    }
}

/// Normalize a discovered path to the caller-supplied working directory.
/// Paths under `cwd` become relative; paths that would escape it stay
/// absolute.
pub(super) fn normalize_path(cwd: &Path, path: &Path) -> String {
    match path.strip_prefix(cwd) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

fn build_exclude_matcher(source: &Path, patterns: &[String]) -> Result<ignore::gitignore::Gitignore> {
    let mut builder = ignore::gitignore::GitignoreBuilder::new(source);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| CairnError::Config(format!("invalid exclude pattern '{pattern}': {e}")))?;
    }
    builder
        .build()
        .map_err(|e| CairnError::Config(format!("exclude matcher build failed: {e}")))
}

#[cfg(unix)]
fn file_owner_and_mode(metadata: &std::fs::Metadata) -> (u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.mode() & 0o7777, metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn file_owner_and_mode(_metadata: &std::fs::Metadata) -> (u32, u32, u32) {
    (0o644, 0, 0)
}

fn mod_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Walk one source path and yield entries in deterministic name order.
///
/// Device, socket, and FIFO entries are skipped, as are entries matching
/// the exclude patterns (whole subtrees for directories). Entries that
/// vanish mid-walk are skipped with a warning.
fn walk_source<'a>(
    cwd: &'a Path,
    source: &'a Path,
    excludes: &'a [String],
    codecs: (EncryptionCodec, CompressionCodec),
) -> Box<dyn Iterator<Item = Result<WalkEntry>> + Send + 'a> {
    let matcher = match build_exclude_matcher(source, excludes) {
        Ok(m) => m,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };

    let mut builder = WalkBuilder::new(source);
    builder.follow_links(false);
    builder.hidden(false);
    builder.ignore(false);
    builder.git_ignore(false);
    builder.git_global(false);
    builder.git_exclude(false);
    builder.require_git(false);
    builder.sort_by_file_name(std::ffi::OsStr::cmp);

    let source_buf = source.to_path_buf();
    builder.filter_entry(move |entry| {
        let path = entry.path();
        if path == source_buf {
            return true;
        }
        let rel = path.strip_prefix(&source_buf).unwrap_or(path);
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        !matcher.matched_path_or_any_parents(rel, is_dir).is_ignore()
    });

    let (encryption, compression) = codecs;
    let iter = builder.build().filter_map(move |entry_result| {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                if e.io_error()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
                {
                    warn!(error = %e, "entry vanished during walk, skipping");
                    return None;
                }
                return Some(Err(CairnError::Other(format!("walk error: {e}"))));
            }
        };

        let abs_path = entry.path().to_path_buf();
        let path = normalize_path(cwd, &abs_path);
        if path.is_empty() || path == "." {
            return None;
        }

        let metadata = match std::fs::symlink_metadata(&abs_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %abs_path.display(), "entry vanished before stat, skipping");
                return None;
            }
            Err(e) => {
                return Some(Err(CairnError::Other(format!(
                    "stat error for {}: {e}",
                    abs_path.display()
                ))))
            }
        };

        let file_type = metadata.file_type();
        let (kind, link_target) = if file_type.is_dir() {
            (ArchiveKind::Directory, None)
        } else if file_type.is_symlink() {
            match std::fs::read_link(&abs_path) {
                Ok(target) => (
                    ArchiveKind::Symlink,
                    Some(target.to_string_lossy().into_owned()),
                ),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %abs_path.display(), "symlink vanished, skipping");
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            }
        } else if file_type.is_file() {
            (ArchiveKind::File, None)
        } else {
            // Device, socket, FIFO: not archivable.
            return None;
        };

        let (mode, uid, gid) = file_owner_and_mode(&metadata);
        let size = if kind == ArchiveKind::File {
            metadata.len()
        } else {
            0
        };

        let archive = Archive {
            path,
            kind,
            mode,
            uid,
            gid,
            mod_time: mod_time(&metadata),
            size,
            storage_size: 0,
            encrypted: encryption,
            compressed: compression,
            chunks: Vec::new(),
            link_target,
        };

        Some(Ok(match kind {
            ArchiveKind::File => WalkEntry::File {
                file_size: size,
                archive,
                abs_path,
            },
            _ => WalkEntry::Other { archive },
        }))
    });

    Box::new(iter)
}

/// Walk all requested source paths in order.
pub(super) fn discover<'a>(
    cwd: &'a Path,
    paths: &'a [PathBuf],
    excludes: &'a [String],
    encryption: EncryptionCodec,
    compression: CompressionCodec,
) -> Box<dyn Iterator<Item = Result<WalkEntry>> + Send + 'a> {
    let iter = paths
        .iter()
        .flat_map(move |source| walk_source(cwd, source, excludes, (encryption, compression)));
    Box::new(iter)
}
