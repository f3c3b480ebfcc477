use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use cairn_types::ChunkHash;

use crate::compress::{self, CompressionCodec};
use crate::crypto::CryptoEngine;
use crate::erasure;
use crate::error::Result;

/// Per-run transform parameters for the chunk pipeline.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Plaintext chunk size in bytes. A power of two fixed at repository
    /// creation; not content-defined.
    pub chunk_size: u32,
    pub compression: CompressionCodec,
    pub data_parts: u32,
    pub parity_parts: u32,
}

/// One chunk after the full transform: split, hashed, compressed,
/// encrypted, erasure-coded.
pub struct EncodedChunk {
    pub hash: ChunkHash,
    /// Ordinal within the source file, dense from 0.
    pub num: u32,
    pub data_parts: u32,
    pub parity_parts: u32,
    pub original_size: u64,
    pub encrypted_size: u64,
    pub shards: Vec<Vec<u8>>,
}

/// Lazy chunk producer. Each `next()` reads one plaintext chunk from the
/// source and runs it through the transform stack, so memory held at any
/// instant stays bounded by the chunk size times a small constant. The
/// source (and with it any file handle) is released when the stream is
/// dropped, on every exit path.
pub struct ChunkStream<R> {
    source: R,
    config: ChunkConfig,
    crypto: Arc<dyn CryptoEngine>,
    next_num: u32,
    done: bool,
}

impl ChunkStream<File> {
    /// Open a file and chunk it. Errors from the open propagate to the
    /// caller so a vanished file can be told apart from a transform error.
    pub fn open(
        path: &Path,
        config: ChunkConfig,
        crypto: Arc<dyn CryptoEngine>,
    ) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file, config, crypto))
    }
}

impl<R: Read> ChunkStream<R> {
    pub fn new(source: R, mut config: ChunkConfig, crypto: Arc<dyn CryptoEngine>) -> Self {
        config.data_parts = config.data_parts.max(1);
        Self {
            source,
            config,
            crypto,
            next_num: 0,
            done: false,
        }
    }

    /// Read up to one chunk of plaintext. Short reads are filled until
    /// EOF so every chunk except the last has exactly `chunk_size` bytes.
    fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.config.chunk_size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn transform(&self, num: u32, plaintext: Vec<u8>) -> Result<EncodedChunk> {
        let hash = ChunkHash::compute(&plaintext);
        let original_size = plaintext.len() as u64;

        let compressed = compress::compress(self.config.compression, &plaintext)?;
        drop(plaintext);
        let encrypted = self.crypto.encrypt(&compressed)?;
        let encrypted_size = encrypted.len() as u64;

        let shards = erasure::encode(&encrypted, self.config.data_parts, self.config.parity_parts)?;

        Ok(EncodedChunk {
            hash,
            num,
            data_parts: self.config.data_parts,
            parity_parts: self.config.parity_parts,
            original_size,
            encrypted_size,
            shards,
        })
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<EncodedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let plaintext = match self.read_chunk() {
            Ok(buf) => buf,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if plaintext.is_empty() {
            self.done = true;
            return None;
        }

        let num = self.next_num;
        self.next_num += 1;
        match self.transform(num, plaintext) {
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                // Any transform error cancels the rest of the file.
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
