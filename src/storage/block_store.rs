use std::io;

use crate::error::Result;

/// Abstraction over dictionary byte I/O.
///
/// Implemented by `MemBlockStore` (in-memory buffer) and `FileBlockStore` (file on
/// disk). Reads take `&self` so a finished dictionary can be shared by any number of
/// readers; appends take `&mut self` since there is exactly one writer.
pub trait BlockStore {
    /// Read `len` bytes starting at `fp`. Reading past the end is an
    /// `UnexpectedEof` I/O error.
    fn read_bytes(&self, fp: u64, len: usize) -> Result<Vec<u8>>;

    /// Append `buf` and return the file pointer at which it starts.
    fn append_bytes(&mut self, buf: &[u8]) -> Result<u64>;

    /// Current length in bytes (the fp the next append will return).
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make appended bytes durable.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: BlockStore + ?Sized> BlockStore for Box<S> {
    fn read_bytes(&self, fp: u64, len: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(fp, len)
    }

    fn append_bytes(&mut self, buf: &[u8]) -> Result<u64> {
        (**self).append_bytes(buf)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}

pub(crate) fn out_of_range(fp: u64, len: usize, store_len: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "read of {} bytes at fp={} exceeds store length {}",
            len, fp, store_len
        ),
    )
}

/// A `BlockStore` backed by a growable byte vector.
#[derive(Debug, Clone, Default)]
pub struct MemBlockStore {
    data: Vec<u8>,
}

impl MemBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        MemBlockStore { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl BlockStore for MemBlockStore {
    fn read_bytes(&self, fp: u64, len: usize) -> Result<Vec<u8>> {
        let store_len = self.data.len() as u64;
        let end = fp.checked_add(len as u64);
        match end {
            Some(end) if end <= store_len => {
                Ok(self.data[fp as usize..end as usize].to_vec())
            }
            _ => Err(out_of_range(fp, len, store_len).into()),
        }
    }

    fn append_bytes(&mut self, buf: &[u8]) -> Result<u64> {
        let fp = self.data.len() as u64;
        self.data.extend_from_slice(buf);
        Ok(fp)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}
