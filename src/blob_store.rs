//! Blob Store Module
//!
//! Persistence for compressed entries. A cache writes the blobs it produces
//! through to its store, forgets them on invalidation, and can warm-start by
//! installing every persisted entry as cold.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::CompressedBlob;
use crate::error::{CacheError, Result};

const BLOB_EXTENSION: &str = "blob";
const TEMP_EXTENSION: &str = "tmp";

// == Blob Store Trait ==
/// Keyed storage of compressed record sets with one namespace per cache.
///
/// Keys are cache keys encoded with [`encode_key`]. Implementations must be
/// callable from many threads at once.
pub trait BlobStore: Send + Sync {
    fn write(&self, cache: &str, key: &[u8], blob: &CompressedBlob) -> Result<()>;

    fn read(&self, cache: &str, key: &[u8]) -> Result<Option<CompressedBlob>>;

    /// Returns false when nothing was stored under `key`.
    fn remove(&self, cache: &str, key: &[u8]) -> Result<bool>;

    /// Every persisted entry of `cache`, in no particular order.
    fn entries(&self, cache: &str) -> Result<Vec<(Vec<u8>, CompressedBlob)>>;

    fn contains(&self, cache: &str, key: &[u8]) -> Result<bool> {
        Ok(self.read(cache, key)?.is_some())
    }
}

// == Key Encoding ==
pub fn encode_key<K: Serialize>(key: &K) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(key, bincode::config::standard())
        .map_err(|e| CacheError::Storage(format!("key encode failed: {}", e)))
}

pub fn decode_key<K: DeserializeOwned>(bytes: &[u8]) -> Result<K> {
    let (key, consumed): (K, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CacheError::Storage(format!("key decode failed: {}", e)))?;
    if consumed != bytes.len() {
        return Err(CacheError::Storage(format!(
            "{} trailing bytes after key",
            bytes.len() - consumed
        )));
    }
    Ok(key)
}

/// On-disk layout of one entry.
#[derive(Serialize, Deserialize)]
struct StoredBlob {
    raw_bytes: u64,
    record_count: u64,
    bytes: Vec<u8>,
}

impl From<&CompressedBlob> for StoredBlob {
    fn from(blob: &CompressedBlob) -> Self {
        Self {
            raw_bytes: blob.raw_bytes as u64,
            record_count: blob.record_count as u64,
            bytes: blob.bytes.to_vec(),
        }
    }
}

impl From<StoredBlob> for CompressedBlob {
    fn from(stored: StoredBlob) -> Self {
        CompressedBlob::new(
            stored.bytes,
            stored.raw_bytes as usize,
            stored.record_count as usize,
        )
    }
}

// == File Blob Store ==
/// One directory per cache, one file per key. File names are the hex of the
/// encoded key; writes go to a temporary file that is then renamed.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Opens the store at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error("create", &root, e))?;
        debug!("Blob store opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> PathBuf {
        self.root.join(cache)
    }

    fn path_for(&self, cache: &str, key: &[u8]) -> PathBuf {
        self.cache_dir(cache)
            .join(format!("{}.{}", hex::encode(key), BLOB_EXTENSION))
    }

    fn read_file(path: &Path) -> Result<Option<CompressedBlob>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", path, e)),
        };
        let (stored, _): (StoredBlob, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(
                |e| CacheError::Storage(format!("{}: decode failed: {}", path.display(), e)),
            )?;
        Ok(Some(stored.into()))
    }
}

impl BlobStore for FileBlobStore {
    fn write(&self, cache: &str, key: &[u8], blob: &CompressedBlob) -> Result<()> {
        let dir = self.cache_dir(cache);
        fs::create_dir_all(&dir).map_err(|e| io_error("create", &dir, e))?;

        let encoded =
            bincode::serde::encode_to_vec(StoredBlob::from(blob), bincode::config::standard())
                .map_err(|e| CacheError::Storage(format!("blob encode failed: {}", e)))?;

        let path = self.path_for(cache, key);
        let temp = path.with_extension(TEMP_EXTENSION);
        fs::write(&temp, encoded).map_err(|e| io_error("write", &temp, e))?;
        fs::rename(&temp, &path).map_err(|e| io_error("rename", &path, e))
    }

    fn read(&self, cache: &str, key: &[u8]) -> Result<Option<CompressedBlob>> {
        Self::read_file(&self.path_for(cache, key))
    }

    fn remove(&self, cache: &str, key: &[u8]) -> Result<bool> {
        let path = self.path_for(cache, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("remove", &path, e)),
        }
    }

    /// Unreadable files are skipped with a warning.
    fn entries(&self, cache: &str) -> Result<Vec<(Vec<u8>, CompressedBlob)>> {
        let dir = self.cache_dir(cache);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list", &dir, e)),
        };

        let mut entries = Vec::new();
        for item in listing {
            let path = item.map_err(|e| io_error("list", &dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| hex::decode(stem).ok())
            else {
                warn!("Skipping blob with unexpected name {}", path.display());
                continue;
            };
            match Self::read_file(&path) {
                Ok(Some(blob)) => entries.push((key, blob)),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable blob: {}", e),
            }
        }
        Ok(entries)
    }
}

fn io_error(action: &str, path: &Path, error: std::io::Error) -> CacheError {
    CacheError::Storage(format!("{} {}: {}", action, path.display(), error))
}

// == Memory Blob Store ==
/// In-process store, for tests and for sharing blobs between caches of one
/// process.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<(String, Vec<u8>), CompressedBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, cache: &str, key: &[u8], blob: &CompressedBlob) -> Result<()> {
        self.blobs
            .insert((cache.to_string(), key.to_vec()), blob.clone());
        Ok(())
    }

    fn read(&self, cache: &str, key: &[u8]) -> Result<Option<CompressedBlob>> {
        Ok(self
            .blobs
            .get(&(cache.to_string(), key.to_vec()))
            .map(|blob| blob.value().clone()))
    }

    fn remove(&self, cache: &str, key: &[u8]) -> Result<bool> {
        Ok(self
            .blobs
            .remove(&(cache.to_string(), key.to_vec()))
            .is_some())
    }

    fn entries(&self, cache: &str) -> Result<Vec<(Vec<u8>, CompressedBlob)>> {
        Ok(self
            .blobs
            .iter()
            .filter(|item| item.key().0 == cache)
            .map(|item| (item.key().1.clone(), item.value().clone()))
            .collect())
    }
}
