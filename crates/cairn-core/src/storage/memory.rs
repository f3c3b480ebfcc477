use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use url::Url;

use cairn_types::{ChunkHash, SnapshotId};

use crate::error::{CairnError, Result};
use crate::storage::{
    chunk_blob_name, Backend, BackendFactory, CHUNK_INDEX_NAME, REPOSITORY_NAME,
};

/// In-memory storage backend. Thread-safe via Mutex.
///
/// Registered under the `mem` scheme; stores are keyed by URL so two
/// opens of the same `mem://name` address the same blobs for the life of
/// the process.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

pub struct MemoryBackendFactory;

impl BackendFactory for MemoryBackendFactory {
    fn protocols(&self) -> &'static [&'static str] {
        &["mem"]
    }

    fn open(&self, url: &Url) -> Result<Box<dyn Backend>> {
        let name = format!("{}{}", url.host_str().unwrap_or(""), url.path());
        Ok(Box::new(MemoryBackend::named(&name)))
    }
}

fn shared_stores() -> &'static Mutex<HashMap<String, Arc<Mutex<HashMap<String, Vec<u8>>>>>> {
    static STORES: OnceLock<Mutex<HashMap<String, Arc<Mutex<HashMap<String, Vec<u8>>>>>>> =
        OnceLock::new();
    STORES.get_or_init(Default::default)
}

impl MemoryBackend {
    /// A fresh private store, not reachable through any URL.
    pub fn new() -> Self {
        Self {
            name: "anonymous".into(),
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The process-wide store for `mem://{name}`.
    pub fn named(name: &str) -> Self {
        let store = {
            let mut stores = shared_stores().lock().unwrap();
            Arc::clone(stores.entry(name.to_string()).or_default())
        };
        Self {
            name: name.to_string(),
            store,
        }
    }

    /// A second handle onto the same blobs.
    pub fn handle(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: Arc::clone(&self.store),
        }
    }

    /// Number of blobs whose key starts with `prefix`.
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        let map = self.store.lock().unwrap();
        map.keys().filter(|k| k.starts_with(prefix)).count()
    }

    /// Remove a blob outright, bypassing the backend contract. Test-side
    /// corruption and shard-loss scenarios use this.
    pub fn remove_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().unwrap().remove(key)
    }

    /// Overwrite a blob outright, bypassing the backend contract.
    pub fn insert_raw(&self, key: &str, data: Vec<u8>) {
        self.store.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn keys(&self) -> Vec<String> {
        let map = self.store.lock().unwrap();
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn chunk_key(hash: &ChunkHash, part: u32, total_parts: u32) -> String {
        format!("chunks/{}", chunk_blob_name(hash, part, total_parts))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn location(&self) -> String {
        format!("mem://{}", self.name)
    }

    fn protocols(&self) -> &'static [&'static str] {
        &["mem"]
    }

    fn available_space(&self) -> Result<u64> {
        Err(CairnError::AvailableSpaceUnknown)
    }

    fn load_chunk(&self, hash: &ChunkHash, part: u32, total_parts: u32) -> Result<Vec<u8>> {
        let map = self.store.lock().unwrap();
        map.get(&Self::chunk_key(hash, part, total_parts))
            .cloned()
            .ok_or(CairnError::ChunkMissing(*hash))
    }

    fn store_chunk(
        &self,
        hash: &ChunkHash,
        part: u32,
        total_parts: u32,
        data: &[u8],
    ) -> Result<u64> {
        let mut map = self.store.lock().unwrap();
        let key = Self::chunk_key(hash, part, total_parts);
        if map.contains_key(&key) {
            return Ok(0);
        }
        map.insert(key, data.to_vec());
        Ok(data.len() as u64)
    }

    fn delete_chunk(&self, hash: &ChunkHash, part: u32, total_parts: u32) -> Result<()> {
        let mut map = self.store.lock().unwrap();
        map.remove(&Self::chunk_key(hash, part, total_parts));
        Ok(())
    }

    fn load_snapshot(&self, id: &SnapshotId) -> Result<Vec<u8>> {
        let map = self.store.lock().unwrap();
        map.get(&format!("snapshots/{id}"))
            .cloned()
            .ok_or_else(|| CairnError::SnapshotMissing(id.to_string()))
    }

    fn save_snapshot(&self, id: &SnapshotId, data: &[u8]) -> Result<()> {
        let mut map = self.store.lock().unwrap();
        map.insert(format!("snapshots/{id}"), data.to_vec());
        Ok(())
    }

    fn load_chunk_index(&self) -> Result<Vec<u8>> {
        let map = self.store.lock().unwrap();
        map.get(&format!("chunks/{CHUNK_INDEX_NAME}"))
            .cloned()
            .ok_or_else(|| CairnError::Corrupt("chunk index blob is missing".into()))
    }

    fn save_chunk_index(&self, data: &[u8]) -> Result<()> {
        let mut map = self.store.lock().unwrap();
        map.insert(format!("chunks/{CHUNK_INDEX_NAME}"), data.to_vec());
        Ok(())
    }

    fn load_repository(&self) -> Result<Vec<u8>> {
        let map = self.store.lock().unwrap();
        map.get(&format!("repository/{REPOSITORY_NAME}"))
            .cloned()
            .ok_or_else(|| CairnError::RepositoryMissing(self.location()))
    }

    fn save_repository(&self, data: &[u8]) -> Result<()> {
        let mut map = self.store.lock().unwrap();
        map.insert(format!("repository/{REPOSITORY_NAME}"), data.to_vec());
        Ok(())
    }

    fn init_repository(&self) -> Result<()> {
        let map = self.store.lock().unwrap();
        for namespace in ["chunks/", "snapshots/", "repository/"] {
            if map.keys().any(|k| k.starts_with(namespace)) {
                return Err(CairnError::RepositoryExists(self.location()));
            }
        }
        Ok(())
    }
}
