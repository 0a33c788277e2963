/// Postings-side collaborators of the term dictionary.
///
/// The dictionary stores one opaque stats payload per term. This module defines
/// what goes into that payload:
///   TermStats: [doc_freq: varint] [total_term_freq - doc_freq: varint]
///   Inline postings: [TermStats] [PostingList]
///
/// PostingList: term -> [(doc_id, positions)]
/// Compression: delta encoding + varint for doc ids and positions.
use std::collections::BTreeMap;

use crate::codec::{decode_varint, encode_varint};
use crate::error::{Result, TermDictError};

/// Produces the stats payload for a term at dictionary build time.
pub trait PostingsWriter {
    /// Append the payload for `term` to `out`. Returns the number of bytes written.
    fn write_term_stats(&mut self, term: &[u8], out: &mut Vec<u8>) -> Result<usize>;
}

/// Interprets a stats payload read back from the dictionary.
pub trait PostingsReader {
    type TermState;

    fn read_term_stats(&self, bytes: &[u8]) -> Result<Self::TermState>;
}

/// Per-term frequency statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermStats {
    pub doc_freq: u32,
    pub total_term_freq: u64,
}

impl TermStats {
    pub fn new(doc_freq: u32, total_term_freq: u64) -> Self {
        TermStats {
            doc_freq,
            total_term_freq,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        if self.total_term_freq < self.doc_freq as u64 {
            return Err(TermDictError::Postings(format!(
                "total_term_freq {} < doc_freq {}",
                self.total_term_freq, self.doc_freq
            )));
        }
        encode_varint(buf, self.doc_freq as u64);
        encode_varint(buf, self.total_term_freq - self.doc_freq as u64);
        Ok(())
    }

    pub fn decode(data: &[u8], offset: &mut usize) -> Result<Self> {
        let doc_freq = decode_varint(data, offset)
            .ok_or_else(|| TermDictError::Postings("truncated doc_freq".into()))?;
        let doc_freq = u32::try_from(doc_freq)
            .map_err(|_| TermDictError::Postings(format!("doc_freq {} out of range", doc_freq)))?;
        let extra = decode_varint(data, offset)
            .ok_or_else(|| TermDictError::Postings("truncated total_term_freq".into()))?;
        let total_term_freq = (doc_freq as u64)
            .checked_add(extra)
            .ok_or_else(|| TermDictError::Postings("total_term_freq overflow".into()))?;
        Ok(TermStats {
            doc_freq,
            total_term_freq,
        })
    }
}

/// A posting entry for a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub doc_id: u64,
    pub positions: Vec<u32>,
}

/// A posting list for a single term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostingList {
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList {
            postings: Vec::new(),
        }
    }

    /// Add a posting for a document.
    pub fn add(&mut self, doc_id: u64, positions: Vec<u32>) {
        // Keep sorted by doc_id
        match self.postings.binary_search_by_key(&doc_id, |p| p.doc_id) {
            Ok(idx) => {
                self.postings[idx].positions.extend(positions);
                self.postings[idx].positions.sort();
                self.postings[idx].positions.dedup();
            }
            Err(idx) => {
                let mut positions = positions;
                positions.sort();
                positions.dedup();
                self.postings.insert(idx, Posting { doc_id, positions });
            }
        }
    }

    /// Get posting for a specific document.
    pub fn get(&self, doc_id: u64) -> Option<&Posting> {
        self.postings
            .binary_search_by_key(&doc_id, |p| p.doc_id)
            .ok()
            .map(|idx| &self.postings[idx])
    }

    /// Document frequency (number of documents containing this term).
    pub fn df(&self) -> usize {
        self.postings.len()
    }

    /// Frequency statistics derived from the postings.
    pub fn stats(&self) -> TermStats {
        let ttf: u64 = self
            .postings
            .iter()
            .map(|p| p.positions.len().max(1) as u64)
            .sum();
        TermStats::new(self.postings.len() as u32, ttf)
    }

    /// Serialize posting list with delta + varint compression.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        encode_varint(buf, self.postings.len() as u64);

        let mut prev_doc_id = 0u64;
        for posting in &self.postings {
            encode_varint(buf, posting.doc_id - prev_doc_id);
            prev_doc_id = posting.doc_id;

            encode_varint(buf, posting.positions.len() as u64);
            let mut prev_pos = 0u32;
            for &pos in &posting.positions {
                encode_varint(buf, (pos - prev_pos) as u64);
                prev_pos = pos;
            }
        }
    }

    /// Deserialize posting list.
    pub fn deserialize(data: &[u8], offset: &mut usize) -> Option<Self> {
        let count = decode_varint(data, offset)? as usize;
        // Every posting needs at least two bytes; reject absurd counts early.
        if count > data.len().saturating_sub(*offset) {
            return None;
        }
        let mut postings = Vec::with_capacity(count);

        let mut prev_doc_id = 0u64;
        for _ in 0..count {
            let delta = decode_varint(data, offset)?;
            let doc_id = prev_doc_id.checked_add(delta)?;
            prev_doc_id = doc_id;

            let pos_count = decode_varint(data, offset)? as usize;
            if pos_count > data.len().saturating_sub(*offset) {
                return None;
            }
            let mut positions = Vec::with_capacity(pos_count);
            let mut prev_pos = 0u32;
            for _ in 0..pos_count {
                let delta = u32::try_from(decode_varint(data, offset)?).ok()?;
                let pos = prev_pos.checked_add(delta)?;
                positions.push(pos);
                prev_pos = pos;
            }

            postings.push(Posting { doc_id, positions });
        }

        Some(PostingList { postings })
    }
}

/// Payload writer that only records frequency statistics, looked up per term.
#[derive(Debug, Default)]
pub struct StatsOnlyWriter {
    stats: BTreeMap<Vec<u8>, TermStats>,
}

impl StatsOnlyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, term: &[u8], stats: TermStats) {
        self.stats.insert(term.to_vec(), stats);
    }
}

impl PostingsWriter for StatsOnlyWriter {
    fn write_term_stats(&mut self, term: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        let stats = self.stats.get(term).copied().ok_or_else(|| {
            TermDictError::Postings(format!("no stats recorded for term {:?}", term))
        })?;
        let before = out.len();
        stats.encode(out)?;
        Ok(out.len() - before)
    }
}

/// Reader counterpart of `StatsOnlyWriter`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatsOnlyReader;

impl PostingsReader for StatsOnlyReader {
    type TermState = TermStats;

    fn read_term_stats(&self, bytes: &[u8]) -> Result<TermStats> {
        let mut offset = 0;
        TermStats::decode(bytes, &mut offset)
    }
}

/// Inline postings: the whole posting list lives in the term's stats payload.
///
/// Occurrences are buffered per term; `terms()` yields them in dictionary order so
/// the caller can feed the dictionary writer directly.
#[derive(Debug, Default)]
pub struct InlinePostingsWriter {
    pending: BTreeMap<Vec<u8>, PostingList>,
}

impl InlinePostingsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `term` occurs in `doc_id` at `position`.
    pub fn add_occurrence(&mut self, term: &[u8], doc_id: u64, position: u32) {
        self.pending
            .entry(term.to_vec())
            .or_default()
            .add(doc_id, vec![position]);
    }

    /// Buffered terms in byte order.
    pub fn terms(&self) -> Vec<Vec<u8>> {
        self.pending.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl PostingsWriter for InlinePostingsWriter {
    fn write_term_stats(&mut self, term: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        let list = self.pending.remove(term).ok_or_else(|| {
            TermDictError::Postings(format!("no postings buffered for term {:?}", term))
        })?;
        let before = out.len();
        list.stats().encode(out)?;
        list.serialize_into(out);
        Ok(out.len() - before)
    }
}

/// Decoded inline payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineTermState {
    pub stats: TermStats,
    pub postings: PostingList,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePostingsReader;

impl PostingsReader for InlinePostingsReader {
    type TermState = InlineTermState;

    fn read_term_stats(&self, bytes: &[u8]) -> Result<InlineTermState> {
        let mut offset = 0;
        let stats = TermStats::decode(bytes, &mut offset)?;
        let postings = PostingList::deserialize(bytes, &mut offset)
            .ok_or_else(|| TermDictError::Postings("truncated posting list".into()))?;
        if offset != bytes.len() {
            return Err(TermDictError::Postings(format!(
                "{} trailing bytes after posting list",
                bytes.len() - offset
            )));
        }
        if postings.df() != stats.doc_freq as usize {
            return Err(TermDictError::Postings(format!(
                "doc_freq {} does not match posting count {}",
                stats.doc_freq,
                postings.df()
            )));
        }
        Ok(InlineTermState { stats, postings })
    }
}
