//! Blocktree: a block-tree term dictionary.
//!
//! Sorted byte-string terms of one or more fields, each with an opaque stats
//! payload, are packed into a tree of prefix-sharing blocks:
//! - terms sharing a prefix are written together, suffixes only
//! - oversized prefixes are split into floor blocks keyed by their lead byte
//! - an FST terms index maps block prefixes to file pointers
//! - readers enumerate and seek with a reusable frame stack
//! - a stats walk re-derives and cross-checks every block's accounting

pub mod error;
pub mod codec;
pub mod config;
pub mod postings;
pub mod storage;
pub mod index;
pub mod blocktree;

pub use crate::blocktree::{
    FieldTerms, FieldWriter, SeekStatus, Stats, TermDictReader, TermDictWriter, TermsEnum,
};
pub use crate::config::BlockTreeConfig;
pub use crate::error::{Result, TermDictError};
pub use crate::postings::TermStats;
pub use crate::storage::{BlockStore, FileBlockStore, MemBlockStore};
