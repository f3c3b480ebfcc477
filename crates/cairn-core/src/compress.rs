use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};

/// Compression codec wire IDs, stored per archive (chunk payloads) and
/// implied per repository version (metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "u16", try_from = "u16")]
pub enum CompressionCodec {
    #[default]
    None = 0,
    Gzip = 1,
    Lzma = 2,
}

impl CompressionCodec {
    /// The codec applied to snapshot and chunk-index metadata for a given
    /// repository version: v1 wrote GZip, v2 writes LZMA, anything newer
    /// writes uncompressed until it says otherwise.
    pub fn for_metadata(repository_version: u32) -> Self {
        match repository_version {
            1 => CompressionCodec::Gzip,
            2 => CompressionCodec::Lzma,
            _ => CompressionCodec::None,
        }
    }

    pub fn id(&self) -> u16 {
        *self as u16
    }
}

impl From<CompressionCodec> for u16 {
    fn from(codec: CompressionCodec) -> u16 {
        codec as u16
    }
}

impl TryFrom<u16> for CompressionCodec {
    type Error = String;

    fn try_from(id: u16) -> std::result::Result<Self, Self::Error> {
        match id {
            0 => Ok(CompressionCodec::None),
            1 => Ok(CompressionCodec::Gzip),
            2 => Ok(CompressionCodec::Lzma),
            other => Err(format!("unknown compression codec id: {other}")),
        }
    }
}

impl std::fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompressionCodec::None => "none",
            CompressionCodec::Gzip => "gzip",
            CompressionCodec::Lzma => "lzma",
        };
        f.write_str(name)
    }
}

/// Compress a buffer with the given codec.
pub fn compress(codec: CompressionCodec, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        CompressionCodec::None => Ok(data.to_vec()),
        CompressionCodec::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| CairnError::Compression(format!("gzip: {e}")))?;
            encoder
                .finish()
                .map_err(|e| CairnError::Compression(format!("gzip: {e}")))
        }
        CompressionCodec::Lzma => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder
                .write_all(data)
                .map_err(|e| CairnError::Compression(format!("lzma: {e}")))?;
            encoder
                .finish()
                .map_err(|e| CairnError::Compression(format!("lzma: {e}")))
        }
    }
}

/// Undo `compress` for the given codec.
pub fn uncompress(codec: CompressionCodec, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        CompressionCodec::None => Ok(data.to_vec()),
        CompressionCodec::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CairnError::Compression(format!("gzip: {e}")))?;
            Ok(out)
        }
        CompressionCodec::Lzma => {
            let mut decoder = xz2::read::XzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CairnError::Compression(format!("lzma: {e}")))?;
            Ok(out)
        }
    }
}
