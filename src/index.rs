//! Terms index: an FST mapping block prefixes to block pointers.
//!
//! Every logical dictionary node (one prefix, possibly split into floor fragments)
//! contributes one key: its shared prefix. The output is the node's canonical
//! fragment pointer packed with two flags. Walking the FST along a target term
//! yields, in one pass, every node on the root-to-leaf path for that term, so a
//! seek can build its frame stack without touching intermediate blocks.

use fst::raw::Output;
use fst::{Map, MapBuilder, Streamer};

use crate::error::{Result, TermDictError};

const OUTPUT_FLAG_IS_FLOOR: u64 = 0x1;
const OUTPUT_FLAG_HAS_TERMS: u64 = 0x2;
const OUTPUT_FLAGS_NUM_BITS: u32 = 2;

/// Pointer to the canonical fragment of a dictionary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPointer {
    pub fp: u64,
    /// The canonical fragment holds at least one term.
    pub has_terms: bool,
    /// The node was split into floor fragments.
    pub is_floor: bool,
}

impl BlockPointer {
    pub fn encode(&self) -> u64 {
        debug_assert!(self.fp < (1u64 << (64 - OUTPUT_FLAGS_NUM_BITS)));
        let mut code = self.fp << OUTPUT_FLAGS_NUM_BITS;
        if self.has_terms {
            code |= OUTPUT_FLAG_HAS_TERMS;
        }
        if self.is_floor {
            code |= OUTPUT_FLAG_IS_FLOOR;
        }
        code
    }

    pub fn decode(code: u64) -> Self {
        BlockPointer {
            fp: code >> OUTPUT_FLAGS_NUM_BITS,
            has_terms: code & OUTPUT_FLAG_HAS_TERMS != 0,
            is_floor: code & OUTPUT_FLAG_IS_FLOOR != 0,
        }
    }
}

pub struct TermsIndex {
    map: Map<Vec<u8>>,
}

impl TermsIndex {
    /// Build from `(prefix, pointer)` pairs in strictly increasing prefix order.
    pub fn build<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<u8>, BlockPointer)>,
    {
        let mut builder = MapBuilder::memory();
        for (prefix, pointer) in entries {
            builder.insert(&prefix, pointer.encode())?;
        }
        let bytes = builder.into_inner()?;
        Self::from_bytes(bytes)
    }

    /// Load a serialized index.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let map = Map::new(bytes)?;
        Ok(TermsIndex { map })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_fst().as_bytes()
    }

    /// Size of the serialized automaton.
    pub fn num_bytes(&self) -> usize {
        self.map.as_fst().size()
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Exact lookup of a node prefix.
    pub fn get(&self, prefix: &[u8]) -> Option<BlockPointer> {
        self.map.get(prefix).map(BlockPointer::decode)
    }

    /// The deepest node whose prefix is a prefix of `term`, with that prefix's length.
    pub fn lookup_approx(&self, term: &[u8]) -> Option<(usize, BlockPointer)> {
        let mut deepest = None;
        self.walk(term, |len, pointer| deepest = Some((len, pointer)));
        deepest
    }

    /// Every node whose prefix is a prefix of `term`, shortest first.
    pub fn lookup_path(&self, term: &[u8]) -> Vec<(usize, BlockPointer)> {
        let mut path = Vec::new();
        self.walk(term, |len, pointer| path.push((len, pointer)));
        path
    }

    fn walk(&self, term: &[u8], mut on_node: impl FnMut(usize, BlockPointer)) {
        let fst = self.map.as_fst();
        let mut node = fst.root();
        let mut out = Output::zero();
        if node.is_final() {
            on_node(0, BlockPointer::decode(out.cat(node.final_output()).value()));
        }
        for (i, &byte) in term.iter().enumerate() {
            let Some(idx) = node.find_input(byte) else {
                break;
            };
            let transition = node.transition(idx);
            out = out.cat(transition.out);
            node = fst.node(transition.addr);
            if node.is_final() {
                on_node(
                    i + 1,
                    BlockPointer::decode(out.cat(node.final_output()).value()),
                );
            }
        }
    }

    /// All `(prefix, pointer)` pairs in prefix order.
    pub fn iter(&self) -> Vec<(Vec<u8>, BlockPointer)> {
        let mut entries = Vec::with_capacity(self.map.len());
        let mut stream = self.map.stream();
        while let Some((key, code)) = stream.next() {
            entries.push((key.to_vec(), BlockPointer::decode(code)));
        }
        entries
    }
}

/// Sort index entries and reject duplicate prefixes.
pub(crate) fn sort_entries(entries: &mut [(Vec<u8>, BlockPointer)]) -> Result<()> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for pair in entries.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(TermDictError::IllegalState(format!(
                "two dictionary nodes share prefix {:?}",
                pair[0].0
            )));
        }
    }
    Ok(())
}

impl std::fmt::Debug for TermsIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermsIndex")
            .field("nodes", &self.len())
            .field("num_bytes", &self.num_bytes())
            .finish()
    }
}
