/// Term dictionary writer.
///
/// Terms of one field arrive in strictly increasing byte order. They are kept on a
/// pending stack; whenever the incoming term abandons a prefix that gathered at
/// least `min_items_in_block` entries, those entries are written out as one node
/// (split into floor fragments if needed) and replaced on the stack by a single
/// sub-block entry. At `finish` everything left is written under the root node.
///
/// Every node's prefix and canonical fragment pointer go into the field's terms
/// index, which is stored in the field directory by `close`.
use tracing::{debug, info};

use crate::blocktree::block::{encode_block, EncodedBlock, EntryInput, FloorLink};
use crate::blocktree::directory::{encode_header, encode_trailer, Directory, FieldMeta};
use crate::blocktree::floor::{plan_fragments, EntryShape};
use crate::blocktree::stats::Stats;
use crate::config::BlockTreeConfig;
use crate::error::{Result, TermDictError};
use crate::index::{sort_entries, BlockPointer, TermsIndex};
use crate::postings::{PostingsWriter, TermStats};
use crate::storage::BlockStore;

/// Writes the blocks of every field into a store, then the field directory.
pub struct TermDictWriter<S: BlockStore> {
    store: S,
    segment: String,
    config: BlockTreeConfig,
    fields: Vec<FieldMeta>,
    /// Names handed out by `field`, finished or not.
    opened: Vec<String>,
}

impl<S: BlockStore> TermDictWriter<S> {
    /// Start a dictionary in an empty store.
    pub fn new(mut store: S, segment: &str, config: BlockTreeConfig) -> Result<Self> {
        config.validate()?;
        if !store.is_empty() {
            return Err(TermDictError::IllegalState(format!(
                "dictionary store must be empty; it holds {} bytes",
                store.len()
            )));
        }
        store.append_bytes(&encode_header())?;
        Ok(TermDictWriter {
            store,
            segment: segment.to_string(),
            config,
            fields: Vec::new(),
            opened: Vec::new(),
        })
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn config(&self) -> &BlockTreeConfig {
        &self.config
    }

    /// Start writing a field. Each name may be used once.
    pub fn field(&mut self, name: &str) -> Result<FieldWriter<'_, S>> {
        if self.opened.iter().any(|n| n == name) {
            return Err(TermDictError::MalformedInput(format!(
                "field {} written twice",
                name
            )));
        }
        self.opened.push(name.to_string());
        let stats = Stats::new(&self.segment, name);
        Ok(FieldWriter {
            dict: self,
            name: name.to_string(),
            pending: Vec::new(),
            prefix_starts: Vec::new(),
            last_term: Vec::new(),
            num_terms: 0,
            total_term_bytes: 0,
            min_term: None,
            max_term: None,
            index_entries: Vec::new(),
            stats,
        })
    }

    /// Write the field directory and trailer, sync, and hand back the store.
    pub fn close(mut self) -> Result<S> {
        let directory = Directory {
            segment: self.segment.clone(),
            fields: std::mem::take(&mut self.fields),
        };
        let bytes = directory.encode();
        let dir_fp = self.store.append_bytes(&bytes)?;
        self.store
            .append_bytes(&encode_trailer(dir_fp, Directory::checksum(&bytes)))?;
        self.store.sync()?;
        info!(
            segment = %self.segment,
            fields = directory.fields.len(),
            bytes = self.store.len(),
            "closed term dictionary"
        );
        Ok(self.store)
    }
}

enum PendingEntry {
    Term { term: Vec<u8>, stats: Vec<u8> },
    Block { prefix: Vec<u8>, fp: u64 },
}

impl PendingEntry {
    fn shape(&self, prefix_len: usize) -> EntryShape {
        match self {
            PendingEntry::Term { term, .. } => EntryShape {
                lead_label: term.get(prefix_len).copied(),
                is_term: true,
            },
            PendingEntry::Block { prefix, .. } => EntryShape {
                lead_label: prefix.get(prefix_len).copied(),
                is_term: false,
            },
        }
    }

    fn input(&self, prefix_len: usize) -> EntryInput<'_> {
        match self {
            PendingEntry::Term { term, stats } => EntryInput::Term {
                suffix: &term[prefix_len..],
                stats,
            },
            PendingEntry::Block { prefix, fp } => EntryInput::SubBlock {
                suffix: &prefix[prefix_len..],
                child_fp: *fp,
            },
        }
    }
}

/// Writes the terms of one field. Dropping it without `finish` leaves the field
/// out of the directory.
pub struct FieldWriter<'a, S: BlockStore> {
    dict: &'a mut TermDictWriter<S>,
    name: String,
    pending: Vec<PendingEntry>,
    /// `prefix_starts[i]`: index in `pending` of the first entry sharing the
    /// current term's first `i + 1` bytes.
    prefix_starts: Vec<usize>,
    last_term: Vec<u8>,
    num_terms: u64,
    total_term_bytes: u64,
    min_term: Option<Vec<u8>>,
    max_term: Option<Vec<u8>>,
    index_entries: Vec<(Vec<u8>, BlockPointer)>,
    stats: Stats,
}

impl<'a, S: BlockStore> FieldWriter<'a, S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_terms(&self) -> u64 {
        self.num_terms
    }

    /// Add a term with its frequency statistics as the payload.
    pub fn add(&mut self, term: &[u8], stats: TermStats) -> Result<()> {
        self.check_order(term)?;
        let mut payload = Vec::new();
        stats.encode(&mut payload)?;
        self.append_term(term, payload)
    }

    /// Add a term whose payload is produced by a postings writer.
    pub fn add_with<P: PostingsWriter>(&mut self, term: &[u8], postings: &mut P) -> Result<()> {
        self.check_order(term)?;
        let mut payload = Vec::new();
        let written = postings.write_term_stats(term, &mut payload)?;
        if written != payload.len() {
            return Err(TermDictError::Postings(format!(
                "postings writer reported {} bytes but wrote {}",
                written,
                payload.len()
            )));
        }
        self.append_term(term, payload)
    }

    fn check_order(&self, term: &[u8]) -> Result<()> {
        if let Some(max) = &self.max_term {
            if term <= max.as_slice() {
                let what = if term == max.as_slice() {
                    "duplicate"
                } else {
                    "out-of-order"
                };
                return Err(TermDictError::MalformedInput(format!(
                    "{} term {:?} after {:?} in field {}",
                    what,
                    String::from_utf8_lossy(term),
                    String::from_utf8_lossy(max),
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn append_term(&mut self, term: &[u8], payload: Vec<u8>) -> Result<()> {
        self.push_term(term)?;
        self.pending.push(PendingEntry::Term {
            term: term.to_vec(),
            stats: payload,
        });
        self.num_terms += 1;
        self.total_term_bytes += term.len() as u64;
        if self.min_term.is_none() {
            self.min_term = Some(term.to_vec());
        }
        self.max_term = Some(term.to_vec());
        Ok(())
    }

    /// Close every prefix of the previous term that `term` does not share, writing
    /// out those that gathered enough entries.
    fn push_term(&mut self, term: &[u8]) -> Result<()> {
        let pos = self
            .last_term
            .iter()
            .zip(term)
            .take_while(|(a, b)| a == b)
            .count();

        for idx in (pos..self.last_term.len()).rev() {
            let prefix_top_size = self.pending.len() - self.prefix_starts[idx];
            if prefix_top_size >= self.dict.config.min_items_in_block {
                self.write_blocks(idx + 1, prefix_top_size)?;
            }
        }

        if self.prefix_starts.len() < term.len() {
            self.prefix_starts.resize(term.len(), 0);
        }
        let pending_len = self.pending.len();
        for start in &mut self.prefix_starts[pos..term.len()] {
            *start = pending_len;
        }

        self.last_term.clear();
        self.last_term.extend_from_slice(term);
        Ok(())
    }

    /// Write the top `count` pending entries as one node with prefix
    /// `last_term[..prefix_len]`, replacing them with a single sub-block entry.
    fn write_blocks(&mut self, prefix_len: usize, count: usize) -> Result<()> {
        let start = self.pending.len() - count;
        let prefix = self.last_term[..prefix_len].to_vec();

        let shapes: Vec<EntryShape> = self.pending[start..]
            .iter()
            .map(|e| e.shape(prefix_len))
            .collect();
        let plan = plan_fragments(
            &shapes,
            self.dict.config.min_items_in_block,
            self.dict.config.max_items_in_block,
        )?;
        let is_floor = plan.len() > 1;

        let canonical_fp = self.dict.store.len();
        let mut fp = canonical_fp;
        let mut encoded: Vec<EncodedBlock> = Vec::with_capacity(plan.len());
        for (i, fragment) in plan.iter().enumerate() {
            let range = start + fragment.entries.start..start + fragment.entries.end;
            let inputs: Vec<EntryInput<'_>> = self.pending[range]
                .iter()
                .map(|e| e.input(prefix_len))
                .collect();
            let floor_links = if i == 0 { plan.len() - 1 } else { 0 };
            let block = encode_block(fp, &inputs, floor_links, i + 1 == plan.len())?;
            fp = block.fp_end();
            encoded.push(block);
        }

        if is_floor {
            let mut links = Vec::with_capacity(plan.len() - 1);
            for (fragment, block) in plan.iter().zip(&encoded).skip(1) {
                let lead_label = fragment.lead_label.ok_or_else(|| {
                    TermDictError::IllegalState("floor fragment without a lead label".into())
                })?;
                links.push(FloorLink {
                    lead_label,
                    offset: block.fp - canonical_fp,
                    has_terms: fragment.has_terms,
                });
            }
            encoded[0].patch_floor_links(&links)?;
        }

        for (fragment, block) in plan.iter().zip(&encoded) {
            let fp = self.dict.store.append_bytes(&block.bytes)?;
            if fp != block.fp {
                return Err(TermDictError::IllegalState(format!(
                    "block encoded for fp={} landed at fp={}",
                    block.fp, fp
                )));
            }
            let summary = block.summary(prefix_len, canonical_fp);
            self.stats.start_block(&summary, is_floor)?;
            for entry in &self.pending[start + fragment.entries.start..start + fragment.entries.end]
            {
                if let PendingEntry::Term { term, .. } = entry {
                    self.stats.term(term)?;
                }
            }
            self.stats.end_block(&summary)?;
        }

        debug!(
            field = %self.name,
            prefix = %String::from_utf8_lossy(&prefix),
            fp = canonical_fp,
            entries = count,
            fragments = plan.len(),
            "wrote block node"
        );

        self.index_entries.push((
            prefix.clone(),
            BlockPointer {
                fp: canonical_fp,
                has_terms: plan[0].has_terms,
                is_floor,
            },
        ));
        self.pending.truncate(start);
        self.pending.push(PendingEntry::Block {
            prefix,
            fp: canonical_fp,
        });
        Ok(())
    }

    /// Flush the remaining entries under the root node and record the field.
    ///
    /// Returns the build-side statistics, or `None` when no term was added (such a
    /// field is not recorded).
    pub fn finish(mut self) -> Result<Option<Stats>> {
        if self.num_terms == 0 {
            debug!(field = %self.name, "skipping field without terms");
            return Ok(None);
        }

        self.push_term(&[])?;
        let count = self.pending.len();
        self.write_blocks(0, count)?;

        let root = match self.pending.as_slice() {
            [PendingEntry::Block { prefix, fp }] if prefix.is_empty() => *fp,
            _ => {
                return Err(TermDictError::IllegalState(format!(
                    "field {} did not reduce to a single root block",
                    self.name
                )))
            }
        };

        let mut entries = std::mem::take(&mut self.index_entries);
        sort_entries(&mut entries)?;
        let root_pointer = entries
            .first()
            .filter(|(prefix, _)| prefix.is_empty())
            .map(|(_, pointer)| *pointer)
            .filter(|pointer| pointer.fp == root)
            .ok_or_else(|| {
                TermDictError::IllegalState(format!("field {} has no root index entry", self.name))
            })?;
        let index = TermsIndex::build(entries)?;

        self.stats.set_index_num_bytes(index.num_bytes() as u64)?;
        self.stats.finish()?;
        if self.stats.total_term_count() != self.num_terms {
            return Err(TermDictError::InvariantViolation {
                segment: self.dict.segment.clone(),
                field: self.name.clone(),
                detail: format!(
                    "wrote {} terms into blocks but {} were added",
                    self.stats.total_term_count(),
                    self.num_terms
                ),
            });
        }

        info!(
            field = %self.name,
            terms = self.num_terms,
            blocks = self.stats.total_block_count(),
            index_bytes = index.num_bytes(),
            "finished field"
        );

        self.dict.fields.push(FieldMeta {
            name: self.name.clone(),
            num_terms: self.num_terms,
            total_term_bytes: self.total_term_bytes,
            root: root_pointer,
            min_term: self.min_term.take().unwrap_or_default(),
            max_term: self.max_term.take().unwrap_or_default(),
            index_bytes: index.as_bytes().to_vec(),
        });
        Ok(Some(self.stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemBlockStore;

    fn config(min: usize, max: usize) -> BlockTreeConfig {
        BlockTreeConfig::new(min, max).unwrap()
    }

    fn build(terms: &[&[u8]], min: usize, max: usize) -> (Stats, MemBlockStore) {
        let mut dict = TermDictWriter::new(MemBlockStore::new(), "_0", config(min, max)).unwrap();
        let mut field = dict.field("body").unwrap();
        for term in terms {
            field.add(term, TermStats::new(1, 1)).unwrap();
        }
        let stats = field.finish().unwrap().unwrap();
        (stats, dict.close().unwrap())
    }

    #[test]
    fn test_cat_dog_dogs() {
        let (stats, _) = build(&[b"cat", b"dog", b"dogs"], 2, 2);
        assert_eq!(stats.total_term_count(), 3);
        assert_eq!(stats.total_block_count(), 2);
        assert_eq!(stats.non_floor_block_count(), 2);
        assert_eq!(stats.mixed_block_count(), 1);
        assert_eq!(stats.terms_only_block_count(), 1);
        assert_eq!(stats.block_count_by_prefix_len()[0], 1);
        assert_eq!(stats.block_count_by_prefix_len()[3], 1);
    }

    #[test]
    fn test_single_term_is_one_root_block() {
        let (stats, _) = build(&[b"only"], 2, 4);
        assert_eq!(stats.total_block_count(), 1);
        assert_eq!(stats.terms_only_block_count(), 1);
        assert_eq!(stats.total_term_bytes(), 4);
    }

    #[test]
    fn test_crowded_prefix_is_floored() {
        let terms: Vec<Vec<u8>> = (0u8..40).map(|i| vec![b'a' + i / 4, b'0' + i % 4]).collect();
        let refs: Vec<&[u8]> = terms.iter().map(|t| t.as_slice()).collect();
        let (stats, _) = build(&refs, 2, 4);
        assert_eq!(stats.total_term_count(), 40);
        assert!(stats.floor_block_count() >= 1);
        assert!(stats.floor_sub_block_count() > stats.floor_block_count());
    }

    #[test]
    fn test_rejects_unsorted_and_duplicate_terms() {
        let mut dict =
            TermDictWriter::new(MemBlockStore::new(), "_0", BlockTreeConfig::default()).unwrap();
        let mut field = dict.field("body").unwrap();
        field.add(b"b", TermStats::new(1, 1)).unwrap();
        let before = field.dict.store.len();
        assert!(matches!(
            field.add(b"b", TermStats::new(1, 1)),
            Err(TermDictError::MalformedInput(_))
        ));
        assert!(matches!(
            field.add(b"a", TermStats::new(1, 1)),
            Err(TermDictError::MalformedInput(_))
        ));
        assert_eq!(field.dict.store.len(), before);
        assert_eq!(field.num_terms(), 1);
    }

    #[test]
    fn test_duplicate_field_and_empty_field() {
        let mut dict =
            TermDictWriter::new(MemBlockStore::new(), "_0", BlockTreeConfig::default()).unwrap();
        assert!(dict.field("empty").unwrap().finish().unwrap().is_none());
        assert!(matches!(
            dict.field("empty"),
            Err(TermDictError::MalformedInput(_))
        ));
        let store = dict.close().unwrap();
        assert!(store.len() > 0);
    }

    #[test]
    fn test_store_must_be_empty() {
        let store = MemBlockStore::from_bytes(vec![0; 4]);
        assert!(TermDictWriter::new(store, "_0", BlockTreeConfig::default()).is_err());
    }
}
