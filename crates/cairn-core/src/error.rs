use thiserror::Error;

use cairn_types::ChunkHash;

pub type Result<T> = std::result::Result<T, CairnError>;

#[derive(Debug, Error)]
pub enum CairnError {
    #[error("invalid repository URL '{0}'")]
    InvalidRepositoryUrl(String),

    #[error("repository URL is missing a username")]
    InvalidUsername,

    #[error("repository URL is missing a password")]
    InvalidPassword,

    #[error("decryption failed: wrong password or corrupted data")]
    WrongPassword,

    #[error("repository already exists at '{0}'")]
    RepositoryExists(String),

    #[error("repository not found at '{0}'")]
    RepositoryMissing(String),

    #[error("snapshot not found: '{0}'")]
    SnapshotMissing(String),

    #[error("chunk not found or unrecoverable: {0}")]
    ChunkMissing(ChunkHash),

    #[error("available space is unknown for this backend")]
    AvailableSpaceUnknown,

    #[error("failed to delete chunk {0}")]
    DeleteChunkFailed(String),

    #[error("unsupported URL scheme: '{0}'")]
    UnsupportedScheme(String),

    #[error("backend I/O error: {0}")]
    BackendIo(String),

    #[error("corrupted data: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CairnError {
    /// Returns `true` for source-file errors the backup pipeline may skip:
    /// the file vanished between discovery and open.
    pub fn is_vanished_file(&self) -> bool {
        matches!(self, CairnError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
