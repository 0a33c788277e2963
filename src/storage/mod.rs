/// Backing stores for term dictionary bytes.
///
/// The dictionary is written append-only and read by byte range.
pub mod block_store;
pub mod file_store;

pub use block_store::{BlockStore, MemBlockStore};
pub use file_store::FileBlockStore;
