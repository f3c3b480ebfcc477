use reed_solomon_erasure::galois_8::ReedSolomon;

use cairn_types::ChunkHash;

use crate::error::{CairnError, Result};

/// Total number of shards a chunk splits into. When no parity is
/// requested the chunk is stored as a single shard, but keeps the
/// configured data-part count in its blob name.
pub fn total_shards(data_parts: u32, parity_parts: u32) -> u32 {
    if parity_parts == 0 {
        data_parts
    } else {
        data_parts + parity_parts
    }
}

/// Number of blobs actually written for a chunk.
pub fn stored_shards(data_parts: u32, parity_parts: u32) -> u32 {
    if parity_parts == 0 {
        1
    } else {
        data_parts + parity_parts
    }
}

/// Split a ciphertext into `data_parts + parity_parts` Reed-Solomon
/// shards. Data shards are zero-padded to a common length; the original
/// length must be carried alongside (the chunk ref's encrypted size) so
/// reconstruction can trim the padding.
///
/// `parity_parts = 0` skips coding entirely and emits the ciphertext as
/// one shard.
pub fn encode(data: &[u8], data_parts: u32, parity_parts: u32) -> Result<Vec<Vec<u8>>> {
    if data_parts < 1 {
        return Err(CairnError::Config(
            "erasure coding requires at least one data part".into(),
        ));
    }
    if parity_parts == 0 {
        return Ok(vec![data.to_vec()]);
    }
    let total = (data_parts + parity_parts) as usize;
    if total > 256 {
        return Err(CairnError::Config(format!(
            "erasure coding supports at most 256 shards, got {total}"
        )));
    }

    let data_parts = data_parts as usize;
    let shard_len = data.len().div_ceil(data_parts).max(1);

    let mut shards: Vec<Vec<u8>> = Vec::with_capacity(total);
    for i in 0..data_parts {
        let start = (i * shard_len).min(data.len());
        let end = ((i + 1) * shard_len).min(data.len());
        let mut shard = data[start..end].to_vec();
        shard.resize(shard_len, 0);
        shards.push(shard);
    }
    for _ in 0..(total - data_parts) {
        shards.push(vec![0u8; shard_len]);
    }

    let coder = ReedSolomon::new(data_parts, total - data_parts)
        .map_err(|e| CairnError::Other(format!("reed-solomon init: {e}")))?;
    coder
        .encode(&mut shards)
        .map_err(|e| CairnError::Other(format!("reed-solomon encode: {e}")))?;

    Ok(shards)
}

/// Rebuild the ciphertext from whatever shards survived. Any `data_parts`
/// of the `data_parts + parity_parts` shards suffice; fewer is
/// unrecoverable and reported as a missing chunk.
pub fn reconstruct(
    hash: &ChunkHash,
    mut shards: Vec<Option<Vec<u8>>>,
    data_parts: u32,
    parity_parts: u32,
    encrypted_size: u64,
) -> Result<Vec<u8>> {
    if parity_parts == 0 {
        return shards
            .into_iter()
            .flatten()
            .next()
            .ok_or(CairnError::ChunkMissing(*hash));
    }

    let data_parts = data_parts as usize;
    let parity_parts = parity_parts as usize;
    if shards.len() != data_parts + parity_parts {
        return Err(CairnError::Corrupt(format!(
            "chunk {hash}: expected {} shards, got {}",
            data_parts + parity_parts,
            shards.len()
        )));
    }

    let present = shards.iter().filter(|s| s.is_some()).count();
    if present < data_parts {
        return Err(CairnError::ChunkMissing(*hash));
    }

    let coder = ReedSolomon::new(data_parts, parity_parts)
        .map_err(|e| CairnError::Other(format!("reed-solomon init: {e}")))?;
    coder
        .reconstruct(&mut shards)
        .map_err(|_| CairnError::ChunkMissing(*hash))?;

    let mut out = Vec::with_capacity(encrypted_size as usize);
    for shard in shards.into_iter().take(data_parts) {
        // reconstruct() filled every missing slot
        out.extend_from_slice(&shard.unwrap_or_default());
    }
    out.truncate(encrypted_size as usize);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ChunkHash {
        ChunkHash::compute(b"test chunk")
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn encode_shard_counts() {
        let data = payload(1000);
        let shards = encode(&data, 4, 2).unwrap();
        assert_eq!(shards.len(), 6);
        let len = shards[0].len();
        assert!(shards.iter().all(|s| s.len() == len));
    }

    #[test]
    fn roundtrip_no_loss() {
        let data = payload(997); // deliberately not divisible
        let shards = encode(&data, 3, 2).unwrap();
        let present = shards.into_iter().map(Some).collect();
        let restored = reconstruct(&hash(), present, 3, 2, data.len() as u64).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn recovers_from_parity_many_losses() {
        let data = payload(4096);
        let shards = encode(&data, 2, 2).unwrap();
        // Drop any 2 of the 4 shards.
        for (a, b) in [(0, 1), (0, 3), (2, 3), (1, 2)] {
            let mut present: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
            present[a] = None;
            present[b] = None;
            let restored = reconstruct(&hash(), present, 2, 2, data.len() as u64).unwrap();
            assert_eq!(restored, data, "losing shards {a} and {b}");
        }
    }

    #[test]
    fn too_many_losses_is_chunk_missing() {
        let data = payload(4096);
        let shards = encode(&data, 2, 1).unwrap();
        let mut present: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        present[0] = None;
        present[2] = None;
        let err = reconstruct(&hash(), present, 2, 1, data.len() as u64).unwrap_err();
        assert!(matches!(err, CairnError::ChunkMissing(_)));
    }

    #[test]
    fn zero_parity_is_passthrough() {
        let data = payload(512);
        let shards = encode(&data, 2, 0).unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0], data);

        let restored = reconstruct(&hash(), vec![Some(data.clone())], 2, 0, 512).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn zero_parity_missing_shard() {
        let err = reconstruct(&hash(), vec![None], 2, 0, 512).unwrap_err();
        assert!(matches!(err, CairnError::ChunkMissing(_)));
    }

    #[test]
    fn zero_data_parts_rejected() {
        assert!(encode(b"x", 0, 1).is_err());
    }

    #[test]
    fn tiny_payload_pads_cleanly() {
        let data = vec![0xFF];
        let shards = encode(&data, 4, 1).unwrap();
        assert_eq!(shards.len(), 5);
        let present = shards.into_iter().map(Some).collect();
        let restored = reconstruct(&hash(), present, 4, 1, 1).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn shard_count_naming_rules() {
        assert_eq!(total_shards(2, 1), 3);
        assert_eq!(stored_shards(2, 1), 3);
        // parity = 0: one stored blob, named with the data-part total.
        assert_eq!(total_shards(2, 0), 2);
        assert_eq!(stored_shards(2, 0), 1);
    }
}
