//! The block tree: terms grouped into prefix-sharing blocks, with floor blocks
//! for crowded prefixes and an FST over block prefixes for seeking.

pub mod block;
pub mod directory;
pub mod floor;
mod frame;
pub mod reader;
pub mod stats;
pub mod terms_enum;
pub mod writer;

pub use reader::{FieldTerms, TermDictReader};
pub use stats::{BlockSummary, Stats};
pub use terms_enum::{SeekStatus, TermsEnum};
pub use writer::{FieldWriter, TermDictWriter};
