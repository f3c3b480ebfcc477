use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use url::Url;

use cairn_types::{ChunkHash, SnapshotId};

use crate::error::{CairnError, Result};
use crate::storage::{
    chunk_blob_name, Backend, BackendFactory, CHUNK_INDEX_NAME, REPOSITORY_NAME,
};

const NAMESPACES: [&str; 3] = ["chunks", "snapshots", "repository"];

/// Storage backend for a local directory, one subdirectory per
/// namespace.
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

pub struct LocalBackendFactory;

impl BackendFactory for LocalBackendFactory {
    fn protocols(&self) -> &'static [&'static str] {
        &["file"]
    }

    fn open(&self, url: &Url) -> Result<Box<dyn Backend>> {
        let path = url
            .to_file_path()
            .map_err(|_| CairnError::InvalidRepositoryUrl(url.to_string()))?;
        Ok(Box::new(LocalBackend::new(path)))
    }
}

impl LocalBackend {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn namespace(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn chunk_path(&self, hash: &ChunkHash, part: u32, total_parts: u32) -> PathBuf {
        self.namespace("chunks")
            .join(chunk_blob_name(hash, part, total_parts))
    }

    fn read_blob(&self, path: &Path, missing: CairnError) -> Result<Vec<u8>> {
        match fs::read(path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(missing),
            Err(e) => Err(CairnError::BackendIo(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    fn write_blob(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
            .map_err(|e| CairnError::BackendIo(format!("write {}: {e}", path.display())))
    }
}

impl Backend for LocalBackend {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn protocols(&self) -> &'static [&'static str] {
        &["file"]
    }

    fn available_space(&self) -> Result<u64> {
        Err(CairnError::AvailableSpaceUnknown)
    }

    fn load_chunk(&self, hash: &ChunkHash, part: u32, total_parts: u32) -> Result<Vec<u8>> {
        let path = self.chunk_path(hash, part, total_parts);
        self.read_blob(&path, CairnError::ChunkMissing(*hash))
    }

    fn store_chunk(
        &self,
        hash: &ChunkHash,
        part: u32,
        total_parts: u32,
        data: &[u8],
    ) -> Result<u64> {
        let path = self.chunk_path(hash, part, total_parts);
        if path.exists() {
            // Already stored under this name; content-addressing makes
            // the existing blob as good as ours.
            return Ok(0);
        }
        self.write_blob(&path, data)?;
        Ok(data.len() as u64)
    }

    fn delete_chunk(&self, hash: &ChunkHash, part: u32, total_parts: u32) -> Result<()> {
        let path = self.chunk_path(hash, part, total_parts);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CairnError::DeleteChunkFailed(format!(
                "{}: {e}",
                chunk_blob_name(hash, part, total_parts)
            ))),
        }
    }

    fn load_snapshot(&self, id: &SnapshotId) -> Result<Vec<u8>> {
        let path = self.namespace("snapshots").join(id.as_str());
        self.read_blob(&path, CairnError::SnapshotMissing(id.to_string()))
    }

    fn save_snapshot(&self, id: &SnapshotId, data: &[u8]) -> Result<()> {
        let path = self.namespace("snapshots").join(id.as_str());
        self.write_blob(&path, data)
    }

    fn load_chunk_index(&self) -> Result<Vec<u8>> {
        let path = self.namespace("chunks").join(CHUNK_INDEX_NAME);
        self.read_blob(
            &path,
            CairnError::Corrupt("chunk index blob is missing".into()),
        )
    }

    fn save_chunk_index(&self, data: &[u8]) -> Result<()> {
        let path = self.namespace("chunks").join(CHUNK_INDEX_NAME);
        self.write_blob(&path, data)
    }

    fn load_repository(&self) -> Result<Vec<u8>> {
        let path = self.namespace("repository").join(REPOSITORY_NAME);
        self.read_blob(&path, CairnError::RepositoryMissing(self.location()))
    }

    fn save_repository(&self, data: &[u8]) -> Result<()> {
        let path = self.namespace("repository").join(REPOSITORY_NAME);
        self.write_blob(&path, data)
    }

    fn init_repository(&self) -> Result<()> {
        for name in NAMESPACES {
            let dir = self.namespace(name);
            match fs::read_dir(&dir) {
                Ok(mut entries) => {
                    if entries.next().is_some() {
                        return Err(CairnError::RepositoryExists(self.location()));
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CairnError::BackendIo(format!(
                        "probe {}: {e}",
                        dir.display()
                    )))
                }
            }
        }
        for name in NAMESPACES {
            fs::create_dir_all(self.namespace(name))?;
        }
        Ok(())
    }
}
