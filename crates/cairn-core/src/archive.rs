use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cairn_types::ChunkHash;

use crate::compress::CompressionCodec;
use crate::crypto::EncryptionCodec;
use crate::erasure;

/// Metadata for one filesystem entry inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    /// Relative POSIX-style path; never contains `..` segments.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ArchiveKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mod_time: DateTime<Utc>,
    /// Logical size in bytes.
    pub size: u64,
    /// Sum of shard bytes actually uploaded for this archive. Stays 0
    /// when every chunk deduplicated.
    #[serde(default)]
    pub storage_size: u64,
    #[serde(default)]
    pub encrypted: EncryptionCodec,
    #[serde(default)]
    pub compressed: CompressionCodec,
    /// For regular files: the chunks making up the content, ordered by
    /// ordinal starting at 0 with no gaps.
    #[serde(default)]
    pub chunks: Vec<ChunkRef>,
    /// For symlinks: the link target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    File,
    Directory,
    Symlink,
}

/// Reference to a chunk stored in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRef {
    pub hash: ChunkHash,
    /// Ordinal within the file.
    pub num: u32,
    pub data_parts: u32,
    pub parity_parts: u32,
    pub original_size: u64,
    /// Ciphertext size before erasure coding; reconstruction trims the
    /// shard padding back to this length.
    pub encrypted_size: u64,
}

impl ChunkRef {
    /// The `total` component of this chunk's shard blob names.
    pub fn total_shards(&self) -> u32 {
        erasure::total_shards(self.data_parts, self.parity_parts)
    }

    /// How many shard blobs exist for this chunk.
    pub fn stored_shards(&self) -> u32 {
        erasure::stored_shards(self.data_parts, self.parity_parts)
    }
}

impl Archive {
    pub fn is_file(&self) -> bool {
        self.kind == ArchiveKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ArchiveKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == ArchiveKind::Symlink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_archive() -> Archive {
        Archive {
            path: "dir/file.txt".into(),
            kind: ArchiveKind::File,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            mod_time: Utc::now(),
            size: 42,
            storage_size: 0,
            encrypted: EncryptionCodec::Aes256Gcm,
            compressed: CompressionCodec::Gzip,
            chunks: vec![ChunkRef {
                hash: ChunkHash::compute(b"content"),
                num: 0,
                data_parts: 2,
                parity_parts: 1,
                original_size: 42,
                encrypted_size: 70,
            }],
            link_target: None,
        }
    }

    #[test]
    fn json_uses_wire_field_names() {
        let json = serde_json::to_value(file_archive()).unwrap();
        assert_eq!(json["type"], "file");
        assert!(json["mod_time"].is_string());
        assert_eq!(json["encrypted"], 1);
        assert_eq!(json["compressed"], 1);
        assert!(json.get("link_target").is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let archive = file_archive();
        let json = serde_json::to_string(&archive).unwrap();
        let back: Archive = serde_json::from_str(&json).unwrap();
        assert_eq!(back.path, archive.path);
        assert_eq!(back.chunks.len(), 1);
        assert_eq!(back.chunks[0].hash, archive.chunks[0].hash);
        assert_eq!(back.chunks[0].encrypted_size, 70);
    }

    #[test]
    fn shard_counts_follow_geometry() {
        let with_parity = ChunkRef {
            hash: ChunkHash::compute(b"x"),
            num: 0,
            data_parts: 2,
            parity_parts: 1,
            original_size: 1,
            encrypted_size: 1,
        };
        assert_eq!(with_parity.total_shards(), 3);
        assert_eq!(with_parity.stored_shards(), 3);

        let without_parity = ChunkRef {
            parity_parts: 0,
            ..with_parity
        };
        assert_eq!(without_parity.total_shards(), 2);
        assert_eq!(without_parity.stored_shards(), 1);
    }
}
