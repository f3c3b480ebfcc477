pub mod chunk_hash;
pub mod snapshot_id;

pub use chunk_hash::ChunkHash;
pub use snapshot_id::SnapshotId;
