pub mod local;
pub mod memory;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use url::Url;

use cairn_types::{ChunkHash, SnapshotId};

use crate::error::{CairnError, Result};

/// Well-known blob name of the chunk index, in the chunks namespace.
pub const CHUNK_INDEX_NAME: &str = "index";

/// Well-known blob name of the repository metadata, in the repository
/// namespace.
pub const REPOSITORY_NAME: &str = "repository.cairn";

/// Blob name for one shard of a chunk: `{hex-hash}.{shard}_{total}`.
/// Every shard of a chunk shares the hash prefix, so a namespace listing
/// groups them together.
pub fn chunk_blob_name(hash: &ChunkHash, part: u32, total_parts: u32) -> String {
    format!("{}.{}_{}", hash.to_hex(), part, total_parts)
}

/// The only boundary through which persistent bytes flow.
///
/// A backend exposes three logical namespaces (chunks, snapshots,
/// repository) and knows nothing about encryption, compression, or the
/// chunk index beyond storing their blobs.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Human-readable identifier for this backend instance.
    fn location(&self) -> String;

    /// URL schemes this backend's factory accepts.
    fn protocols(&self) -> &'static [&'static str];

    /// Free space in bytes, or `AvailableSpaceUnknown` for backends that
    /// cannot tell (the distinct error lets callers treat it as "no quota
    /// information" rather than a failure).
    fn available_space(&self) -> Result<u64>;

    /// Read one shard of a chunk.
    fn load_chunk(&self, hash: &ChunkHash, part: u32, total_parts: u32) -> Result<Vec<u8>>;

    /// Write one shard of a chunk. Idempotent: if the named blob already
    /// exists it is not overwritten and the stored size is reported as 0.
    fn store_chunk(
        &self,
        hash: &ChunkHash,
        part: u32,
        total_parts: u32,
        data: &[u8],
    ) -> Result<u64>;

    /// Delete one shard of a chunk.
    fn delete_chunk(&self, hash: &ChunkHash, part: u32, total_parts: u32) -> Result<()>;

    fn load_snapshot(&self, id: &SnapshotId) -> Result<Vec<u8>>;

    fn save_snapshot(&self, id: &SnapshotId, data: &[u8]) -> Result<()>;

    fn load_chunk_index(&self) -> Result<Vec<u8>>;

    fn save_chunk_index(&self, data: &[u8]) -> Result<()>;

    fn load_repository(&self) -> Result<Vec<u8>>;

    fn save_repository(&self, data: &[u8]) -> Result<()>;

    /// Create the three namespaces for a fresh repository. Fails with
    /// `RepositoryExists` when any of them is already populated.
    fn init_repository(&self) -> Result<()>;
}

/// Constructs configured backend instances from repository URLs.
///
/// Implementations register a prototype at startup; the registry routes
/// each URL scheme to the factory that claims it.
pub trait BackendFactory: Send + Sync {
    fn protocols(&self) -> &'static [&'static str];

    fn open(&self, url: &Url) -> Result<Box<dyn Backend>>;
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn BackendFactory>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn BackendFactory>>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// Register a backend factory for all the schemes it claims. Called
/// explicitly during application startup; later registrations for the
/// same scheme replace earlier ones.
pub fn register_backend(factory: Arc<dyn BackendFactory>) {
    let mut map = registry().write().unwrap();
    for scheme in factory.protocols() {
        map.insert((*scheme).to_string(), Arc::clone(&factory));
    }
}

/// Register the built-in backends (`file`, `mem`). Safe to call more
/// than once.
pub fn register_default_backends() {
    register_backend(Arc::new(local::LocalBackendFactory));
    register_backend(Arc::new(memory::MemoryBackendFactory));
}

/// Open a backend for a repository URL.
///
/// Accepted forms:
/// - Bare paths (`/backups/repo`, `./relative`, `relative`) select the
///   local backend.
/// - `{scheme}://...` is routed through the registry; an unclaimed
///   scheme fails with `UnsupportedScheme`.
pub fn open_backend(raw: &str) -> Result<Box<dyn Backend>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CairnError::InvalidRepositoryUrl(raw.to_string()));
    }

    let url = if trimmed.contains("://") {
        Url::parse(trimmed).map_err(|_| CairnError::InvalidRepositoryUrl(trimmed.to_string()))?
    } else {
        let path = Path::new(trimmed);
        let abs: PathBuf = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&abs)
            .map_err(|_| CairnError::InvalidRepositoryUrl(trimmed.to_string()))?
    };

    let factory = {
        let map = registry().read().unwrap();
        map.get(url.scheme()).cloned()
    };
    match factory {
        Some(factory) => factory.open(&url),
        None => Err(CairnError::UnsupportedScheme(url.scheme().to_string())),
    }
}
