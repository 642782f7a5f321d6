//! Compression Codec
//!
//! Default record-set compression: bincode (serde) encoding, then zlib deflate.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{CacheError, Result};
use crate::record::{Record, RecordSet};

// == Compress ==
/// Encodes and deflates a record set.
pub fn compress<R: Record>(records: &RecordSet<R>) -> Result<Vec<u8>> {
    let encoded = encode(records)?;
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(encoded.len() / 2), Compression::fast());
    encoder
        .write_all(&encoded)
        .map_err(|e| CacheError::Compression(format!("deflate failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CacheError::Compression(format!("deflate finalization failed: {}", e)))
}

// == Decompress ==
/// Inflates and decodes a blob produced by [`compress`].
///
/// Truncated input, trailing garbage and undecodable payloads are all errors.
pub fn decompress<R: Record>(bytes: &[u8]) -> Result<RecordSet<R>> {
    inflate_and_decode(bytes, &mut Vec::new())
}

/// Same as [`decompress`], inflating into a buffer borrowed from `scratch`.
pub fn decompress_with<R: Record>(bytes: &[u8], scratch: &ScratchPool) -> Result<RecordSet<R>> {
    let mut buffer = scratch.take();
    let result = inflate_and_decode(bytes, &mut buffer);
    scratch.give(buffer);
    result
}

fn inflate_and_decode<R: Record>(bytes: &[u8], encoded: &mut Vec<u8>) -> Result<RecordSet<R>> {
    encoded.clear();
    ZlibDecoder::new(bytes)
        .read_to_end(encoded)
        .map_err(|e| CacheError::Compression(format!("inflate failed: {}", e)))?;

    let (records, consumed): (RecordSet<R>, usize) =
        bincode::serde::decode_from_slice(encoded, bincode::config::standard())
            .map_err(|e| CacheError::Compression(format!("decode failed: {}", e)))?;

    if consumed != encoded.len() {
        return Err(CacheError::Compression(format!(
            "{} trailing bytes after record set",
            encoded.len() - consumed
        )));
    }
    Ok(records)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CacheError::Compression(format!("encode failed: {}", e)))
}

// == Scratch Pool ==
/// Bounded pool of inflate buffers, owned by a cache and lent to its loader's
/// `decompress`.
#[derive(Debug)]
pub struct ScratchPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
    /// Larger buffers are dropped instead of pooled
    max_buffer_bytes: usize,
}

impl ScratchPool {
    pub fn new(max_buffers: usize, max_buffer_bytes: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
            max_buffer_bytes,
        }
    }

    pub fn take(&self) -> Vec<u8> {
        self.buffers.lock().pop().unwrap_or_default()
    }

    pub fn give(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.max_buffer_bytes {
            return;
        }
        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers {
            buffers.push(buffer);
        }
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new(8, 4 * 1024 * 1024)
    }
}

// == Compressed Blob ==
/// Compressed form of a demoted record set.
#[derive(Debug, Clone)]
pub struct CompressedBlob {
    pub bytes: Arc<[u8]>,
    /// Estimated size of the decompressed set
    pub raw_bytes: usize,
    pub record_count: usize,
}

impl CompressedBlob {
    pub fn new(bytes: Vec<u8>, raw_bytes: usize, record_count: usize) -> Self {
        Self {
            bytes: bytes.into(),
            raw_bytes,
            record_count,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Compressed size over estimated resident size.
    pub fn ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            0.0
        } else {
            self.bytes.len() as f64 / self.raw_bytes as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{TaxRulesRecord, sample_tax_rules};
    use chrono::NaiveDate;

    fn records() -> RecordSet<TaxRulesRecord> {
        let reference = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        sample_tax_rules(reference).into_iter().take(12).collect()
    }

    #[test]
    fn test_round_trip() {
        let set = records();
        let bytes = compress(&set).unwrap();
        let back: RecordSet<TaxRulesRecord> = decompress(&bytes).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_deterministic() {
        let set = records();
        assert_eq!(compress(&set).unwrap(), compress(&set).unwrap());
    }

    #[test]
    fn test_truncated_blob_is_error() {
        let bytes = compress(&records()).unwrap();
        let result: Result<RecordSet<TaxRulesRecord>> = decompress(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(CacheError::Compression(_))));
    }

    #[test]
    fn test_garbage_is_error() {
        let result: Result<RecordSet<TaxRulesRecord>> = decompress(b"definitely not zlib");
        assert!(matches!(result, Err(CacheError::Compression(_))));
    }

    #[test]
    fn test_scratch_pool_reuses_and_bounds() {
        let pool = ScratchPool::new(1, 1 << 20);
        let set = records();
        let bytes = compress(&set).unwrap();

        let back: RecordSet<TaxRulesRecord> = decompress_with(&bytes, &pool).unwrap();
        assert_eq!(back, set);
        assert_eq!(pool.pooled(), 1);

        pool.give(Vec::with_capacity(16));
        assert_eq!(pool.pooled(), 1);
        pool.give(Vec::with_capacity(2 << 20));
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_blob_ratio() {
        let blob = CompressedBlob::new(vec![0; 25], 100, 3);
        assert_eq!(blob.ratio(), 0.25);
        assert_eq!(CompressedBlob::new(vec![], 0, 0).ratio(), 0.0);
    }
}
