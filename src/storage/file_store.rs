use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::DEFAULT_BLOCK_CACHE_CAPACITY;
use crate::error::{Result, TermDictError};
use crate::storage::block_store::{out_of_range, BlockStore};

/// A `BlockStore` over a single file.
///
/// Bytes are only ever appended, so a range read once never changes and can be
/// served from the LRU cache afterwards. The file handle and the cache sit behind
/// mutexes so one store can serve concurrent readers through `&self`.
pub struct FileBlockStore {
    file: Mutex<File>,
    cache: Mutex<LruCache<(u64, usize), Vec<u8>>>,
    len: u64,
    path: PathBuf,
}

impl FileBlockStore {
    /// Create a new, empty dictionary file. Fails if the file exists.
    pub fn create(path: &Path) -> Result<Self> {
        Self::create_with_cache(path, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    pub fn create_with_cache(path: &Path, cache_capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Self::from_file(file, 0, path, cache_capacity)
    }

    /// Open an existing dictionary file for reading.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_cache(path, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    pub fn open_with_cache(path: &Path, cache_capacity: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let len = file.metadata()?.len();
        Self::from_file(file, len, path, cache_capacity)
    }

    fn from_file(file: File, len: u64, path: &Path, cache_capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(cache_capacity)
            .ok_or_else(|| TermDictError::Config("block cache capacity must be > 0".into()))?;
        Ok(FileBlockStore {
            file: Mutex::new(file),
            cache: Mutex::new(LruCache::new(capacity)),
            len,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cached byte ranges.
    pub fn cached_ranges(&self) -> usize {
        self.cache.lock().len()
    }

    fn read_from_disk(&self, fp: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(fp))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl BlockStore for FileBlockStore {
    fn read_bytes(&self, fp: u64, len: usize) -> Result<Vec<u8>> {
        match fp.checked_add(len as u64) {
            Some(end) if end <= self.len => {}
            _ => return Err(out_of_range(fp, len, self.len).into()),
        }

        if let Some(bytes) = self.cache.lock().get(&(fp, len)) {
            return Ok(bytes.clone());
        }

        let bytes = self.read_from_disk(fp, len)?;
        self.cache.lock().put((fp, len), bytes.clone());
        Ok(bytes)
    }

    fn append_bytes(&mut self, buf: &[u8]) -> Result<u64> {
        let fp = self.len;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(fp))?;
        file.write_all(buf)?;
        self.len += buf.len() as u64;
        Ok(fp)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn sync(&mut self) -> Result<()> {
        self.file.get_mut().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.blk");

        let mut store = FileBlockStore::create(&path).unwrap();
        assert_eq!(store.append_bytes(b"hello").unwrap(), 0);
        assert_eq!(store.append_bytes(b" world").unwrap(), 5);
        store.sync().unwrap();

        assert_eq!(store.read_bytes(0, 11).unwrap(), b"hello world");
        assert_eq!(store.read_bytes(6, 5).unwrap(), b"world");
        assert_eq!(store.cached_ranges(), 2);

        // Served from cache the second time.
        assert_eq!(store.read_bytes(6, 5).unwrap(), b"world");
        assert_eq!(store.cached_ranges(), 2);
    }

    #[test]
    fn test_reopen_sees_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.blk");
        {
            let mut store = FileBlockStore::create(&path).unwrap();
            store.append_bytes(&[7u8; 100]).unwrap();
            store.sync().unwrap();
        }
        let store = FileBlockStore::open(&path).unwrap();
        assert_eq!(store.len(), 100);
        assert_eq!(store.read_bytes(99, 1).unwrap(), vec![7u8]);
        assert!(store.read_bytes(99, 2).is_err());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.blk");
        FileBlockStore::create(&path).unwrap();
        assert!(matches!(
            FileBlockStore::create(&path),
            Err(TermDictError::Io(_))
        ));
    }

    #[test]
    fn test_cache_is_bounded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.blk");
        let mut store = FileBlockStore::create_with_cache(&path, 2).unwrap();
        store.append_bytes(&[1u8; 16]).unwrap();
        for fp in 0..8 {
            store.read_bytes(fp, 1).unwrap();
        }
        assert_eq!(store.cached_ranges(), 2);
    }
}
