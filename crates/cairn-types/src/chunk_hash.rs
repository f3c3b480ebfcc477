use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A 32-byte content address computed as SHA-256 of a plaintext chunk.
///
/// Serialized as a lowercase hex string so it can key JSON maps and name
/// storage blobs directly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkHash(pub [u8; 32]);

impl ChunkHash {
    /// Hash a plaintext chunk.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ChunkHash(out)
    }

    /// Hex-encode the full hash for use as a storage key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err(format!("expected 32 bytes, got {}", bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(ChunkHash(arr))
    }
}

impl FromStr for ChunkHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ChunkHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChunkHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_deterministic() {
        let data = b"hello world";
        assert_eq!(ChunkHash::compute(data), ChunkHash::compute(data));
    }

    #[test]
    fn compute_different_data_different_hash() {
        assert_ne!(ChunkHash::compute(b"hello"), ChunkHash::compute(b"world"));
    }

    #[test]
    fn hex_roundtrip() {
        let hash = ChunkHash::compute(b"roundtrip");
        let parsed = ChunkHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn to_hex_length() {
        assert_eq!(ChunkHash::compute(b"x").to_hex().len(), 64);
    }

    #[test]
    fn from_hex_rejects_short_input() {
        assert!(ChunkHash::from_hex("abcd").is_err());
        assert!(ChunkHash::from_hex("not hex at all").is_err());
    }

    #[test]
    fn empty_data_produces_valid_hash() {
        let hash = ChunkHash::compute(b"");
        assert_eq!(hash.to_hex().len(), 64);
        assert_ne!(hash.0, [0u8; 32]);
    }

    #[test]
    fn serde_uses_hex_string() {
        let hash = ChunkHash::compute(b"serde test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: ChunkHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn works_as_json_map_key() {
        use std::collections::BTreeMap;
        let mut map = BTreeMap::new();
        map.insert(ChunkHash::compute(b"key"), 7u32);
        let json = serde_json::to_string(&map).unwrap();
        let back: BTreeMap<ChunkHash, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }
}
