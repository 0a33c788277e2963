/// Block layout: one physical fragment of a dictionary node.
///
///   [block_len: u32 LE]                  total length, including this word
///   [varint: ent_count << 2 | has_floor_table << 1 | is_last_in_floor]
///   [varint: suffix_len << 1 | is_leaf]
///   [suffix region]
///       leaf:     per entry [varint len][suffix bytes]
///       non-leaf: per entry [varint len << 1 | is_sub_block][suffix bytes]
///   [varint: stats_len]
///   [stats region]                       per term [varint len][payload]
///   [other region]
///       canonical floor fragment only:
///           [varint n] then n x [lead: u8][u64 LE: offset_from_canonical << 1 | has_terms]
///       per sub-block entry, in entry order: [varint block_fp - child_fp]
///
/// Children are always written before their parent, so every sub-block delta is
/// positive. The suffix and stats regions are exactly `suffix_len` and `stats_len`
/// bytes; everything else in the block counts as "other bytes".
use std::ops::Range;

use crate::blocktree::stats::BlockSummary;
use crate::codec::{decode_varint, encode_varint, read_u32_le, read_u64_le, varint_len};
use crate::error::{Result, TermDictError};

const BLOCK_LEN_WIDTH: usize = 4;
const FLOOR_LINK_WIDTH: usize = 9;

/// Forward link from a canonical fragment to one follow-on floor fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorLink {
    /// Lead byte of the fragment's first entry.
    pub lead_label: u8,
    /// Byte distance from the canonical fragment's start.
    pub offset: u64,
    pub has_terms: bool,
}

/// Entry handed to the encoder.
#[derive(Debug, Clone, Copy)]
pub enum EntryInput<'a> {
    Term { suffix: &'a [u8], stats: &'a [u8] },
    SubBlock { suffix: &'a [u8], child_fp: u64 },
}

impl EntryInput<'_> {
    fn suffix(&self) -> &[u8] {
        match self {
            EntryInput::Term { suffix, .. } | EntryInput::SubBlock { suffix, .. } => suffix,
        }
    }
}

/// An encoded fragment, ready to append at the `fp` it was encoded for.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub fp: u64,
    pub bytes: Vec<u8>,
    pub ent_count: usize,
    pub term_count: usize,
    pub suffix_len: usize,
    pub stats_len: usize,
    floor_table: Option<(usize, usize)>,
}

impl EncodedBlock {
    pub fn fp_end(&self) -> u64 {
        self.fp + self.bytes.len() as u64
    }

    pub fn summary(&self, prefix_len: usize, fp_orig: u64) -> BlockSummary {
        BlockSummary {
            prefix_len,
            fp: self.fp,
            fp_orig,
            fp_end: self.fp_end(),
            suffix_len: self.suffix_len as u64,
            stats_len: self.stats_len as u64,
            ent_count: self.ent_count,
            term_count: self.term_count,
            sub_block_count: self.ent_count - self.term_count,
        }
    }

    /// Fill in the floor table reserved by `encode_block`.
    pub fn patch_floor_links(&mut self, links: &[FloorLink]) -> Result<()> {
        let Some((table_pos, count)) = self.floor_table else {
            return Err(TermDictError::IllegalState(
                "block was encoded without a floor table".into(),
            ));
        };
        if links.len() != count {
            return Err(TermDictError::IllegalState(format!(
                "floor table holds {} links, got {}",
                count,
                links.len()
            )));
        }
        let mut pos = table_pos + varint_len(count as u64);
        for link in links {
            let code = (link.offset << 1) | link.has_terms as u64;
            self.bytes[pos] = link.lead_label;
            self.bytes[pos + 1..pos + FLOOR_LINK_WIDTH].copy_from_slice(&code.to_le_bytes());
            pos += FLOOR_LINK_WIDTH;
        }
        Ok(())
    }
}

/// Encode one fragment located at `fp`.
///
/// `floor_links` reserves a floor table of that many links (canonical fragment of a
/// floor node only); fill it later with `patch_floor_links`.
pub fn encode_block(
    fp: u64,
    entries: &[EntryInput<'_>],
    floor_links: usize,
    is_last_in_floor: bool,
) -> Result<EncodedBlock> {
    let is_leaf = entries
        .iter()
        .all(|e| matches!(e, EntryInput::Term { .. }));

    let mut suffixes = Vec::new();
    let mut stats = Vec::new();
    let mut deltas = Vec::new();
    let mut term_count = 0;

    for entry in entries {
        let suffix = entry.suffix();
        if is_leaf {
            encode_varint(&mut suffixes, suffix.len() as u64);
        } else {
            let is_sub_block = matches!(entry, EntryInput::SubBlock { .. }) as u64;
            encode_varint(&mut suffixes, ((suffix.len() as u64) << 1) | is_sub_block);
        }
        suffixes.extend_from_slice(suffix);

        match entry {
            EntryInput::Term { stats: payload, .. } => {
                encode_varint(&mut stats, payload.len() as u64);
                stats.extend_from_slice(payload);
                term_count += 1;
            }
            EntryInput::SubBlock { child_fp, .. } => {
                if *child_fp >= fp {
                    return Err(TermDictError::IllegalState(format!(
                        "sub-block at fp={} is not before its parent at fp={}",
                        child_fp, fp
                    )));
                }
                encode_varint(&mut deltas, fp - child_fp);
            }
        }
    }

    let mut body = Vec::with_capacity(suffixes.len() + stats.len() + deltas.len() + 16);
    let flags = ((floor_links > 0) as u64) << 1 | is_last_in_floor as u64;
    encode_varint(&mut body, ((entries.len() as u64) << 2) | flags);
    encode_varint(&mut body, ((suffixes.len() as u64) << 1) | is_leaf as u64);
    body.extend_from_slice(&suffixes);
    encode_varint(&mut body, stats.len() as u64);
    body.extend_from_slice(&stats);

    let floor_table = if floor_links > 0 {
        let table_pos = BLOCK_LEN_WIDTH + body.len();
        encode_varint(&mut body, floor_links as u64);
        body.resize(body.len() + floor_links * FLOOR_LINK_WIDTH, 0);
        Some((table_pos, floor_links))
    } else {
        None
    };
    body.extend_from_slice(&deltas);

    let block_len = u32::try_from(BLOCK_LEN_WIDTH + body.len()).map_err(|_| {
        TermDictError::IllegalState(format!("block at fp={} exceeds 4 GiB", fp))
    })?;
    let mut bytes = Vec::with_capacity(block_len as usize);
    bytes.extend_from_slice(&block_len.to_le_bytes());
    bytes.extend_from_slice(&body);

    Ok(EncodedBlock {
        fp,
        bytes,
        ent_count: entries.len(),
        term_count,
        suffix_len: suffixes.len(),
        stats_len: stats.len(),
        floor_table,
    })
}

/// Decoding failure, before segment/field context is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptBlock {
    pub fp: u64,
    pub reason: String,
}

impl CorruptBlock {
    fn new(fp: u64, reason: impl Into<String>) -> Self {
        CorruptBlock {
            fp,
            reason: reason.into(),
        }
    }

    pub fn into_error(self, segment: &str, field: &str) -> TermDictError {
        TermDictError::Corruption {
            segment: segment.to_string(),
            field: field.to_string(),
            fp: self.fp,
            reason: self.reason,
        }
    }
}

/// What one decoded entry is, with ranges into the block bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Term { stats: Range<usize> },
    SubBlock { child_fp: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub suffix: Range<usize>,
    pub kind: EntryKind,
}

impl BlockEntry {
    pub fn is_term(&self) -> bool {
        matches!(self.kind, EntryKind::Term { .. })
    }
}

/// Read the length word of the block at the start of `prefix`.
pub fn peek_block_len(fp: u64, prefix: &[u8]) -> std::result::Result<usize, CorruptBlock> {
    let len = read_u32_le(prefix, 0)
        .ok_or_else(|| CorruptBlock::new(fp, "truncated block length"))? as usize;
    if len < BLOCK_LEN_WIDTH {
        return Err(CorruptBlock::new(fp, format!("block length {} too small", len)));
    }
    Ok(len)
}

/// Lazy decoder over one fragment's bytes.
///
/// Region lengths are checked against the block length when the block is parsed;
/// entries are then decoded one at a time. Once the last entry has been read the
/// suffix, stats and other regions must all have been consumed exactly.
#[derive(Debug, Clone)]
pub struct BlockReader {
    fp: u64,
    bytes: Vec<u8>,
    ent_count: usize,
    is_leaf: bool,
    is_last_in_floor: bool,
    floor_links: Vec<FloorLink>,
    suffix_start: usize,
    suffix_end: usize,
    stats_start: usize,
    stats_end: usize,
    other_start: usize,

    next_ent: usize,
    suffix_pos: usize,
    stats_pos: usize,
    other_pos: usize,
    term_count: usize,
    sub_block_count: usize,
}

fn region_end(start: usize, len: u64, limit: usize) -> Option<usize> {
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    (end <= limit).then_some(end)
}

impl BlockReader {
    pub fn parse(fp: u64, bytes: Vec<u8>) -> std::result::Result<Self, CorruptBlock> {
        let block_len = peek_block_len(fp, &bytes)?;
        if block_len != bytes.len() {
            return Err(CorruptBlock::new(
                fp,
                format!("block length {} but {} bytes read", block_len, bytes.len()),
            ));
        }

        let mut pos = BLOCK_LEN_WIDTH;
        let code = decode_varint(&bytes, &mut pos)
            .ok_or_else(|| CorruptBlock::new(fp, "bad entry count"))?;
        let ent_count = usize::try_from(code >> 2)
            .map_err(|_| CorruptBlock::new(fp, "entry count overflow"))?;
        let has_floor_table = code & 0x2 != 0;
        let is_last_in_floor = code & 0x1 != 0;
        if has_floor_table && is_last_in_floor {
            return Err(CorruptBlock::new(
                fp,
                "canonical floor fragment flagged as last in floor",
            ));
        }

        let code = decode_varint(&bytes, &mut pos)
            .ok_or_else(|| CorruptBlock::new(fp, "bad suffix length"))?;
        let is_leaf = code & 0x1 != 0;
        let suffix_start = pos;
        let suffix_end = region_end(pos, code >> 1, bytes.len()).ok_or_else(|| {
            CorruptBlock::new(fp, format!("suffix region of {} bytes overruns block", code >> 1))
        })?;

        pos = suffix_end;
        let stats_len = decode_varint(&bytes, &mut pos)
            .ok_or_else(|| CorruptBlock::new(fp, "bad stats length"))?;
        let stats_start = pos;
        let stats_end = region_end(pos, stats_len, bytes.len()).ok_or_else(|| {
            CorruptBlock::new(fp, format!("stats region of {} bytes overruns block", stats_len))
        })?;

        pos = stats_end;
        let mut floor_links: Vec<FloorLink> = Vec::new();
        if has_floor_table {
            let count = decode_varint(&bytes, &mut pos)
                .ok_or_else(|| CorruptBlock::new(fp, "bad floor table size"))?;
            if count == 0 {
                return Err(CorruptBlock::new(fp, "empty floor table"));
            }
            for _ in 0..count {
                let lead_label = *bytes
                    .get(pos)
                    .ok_or_else(|| CorruptBlock::new(fp, "truncated floor table"))?;
                let code = read_u64_le(&bytes, pos + 1)
                    .ok_or_else(|| CorruptBlock::new(fp, "truncated floor table"))?;
                let offset = code >> 1;
                if offset < block_len as u64 {
                    return Err(CorruptBlock::new(
                        fp,
                        format!("floor link offset {} points inside the canonical fragment", offset),
                    ));
                }
                if let Some(prev) = floor_links.last() {
                    if lead_label <= prev.lead_label || offset <= prev.offset {
                        return Err(CorruptBlock::new(fp, "floor table out of order"));
                    }
                }
                floor_links.push(FloorLink {
                    lead_label,
                    offset,
                    has_terms: code & 0x1 != 0,
                });
                pos += FLOOR_LINK_WIDTH;
            }
        }

        let other_bytes =
            block_len as i64 - (suffix_end - suffix_start) as i64 - (stats_end - stats_start) as i64;
        if other_bytes <= 0 {
            return Err(CorruptBlock::new(
                fp,
                format!("block has {} other bytes", other_bytes),
            ));
        }

        Ok(BlockReader {
            fp,
            bytes,
            ent_count,
            is_leaf,
            is_last_in_floor,
            floor_links,
            suffix_start,
            suffix_end,
            stats_start,
            stats_end,
            other_start: pos,
            next_ent: 0,
            suffix_pos: suffix_start,
            stats_pos: stats_start,
            other_pos: pos,
            term_count: 0,
            sub_block_count: 0,
        })
    }

    pub fn fp(&self) -> u64 {
        self.fp
    }

    pub fn fp_end(&self) -> u64 {
        self.fp + self.bytes.len() as u64
    }

    pub fn ent_count(&self) -> usize {
        self.ent_count
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn is_last_in_floor(&self) -> bool {
        self.is_last_in_floor
    }

    pub fn floor_links(&self) -> &[FloorLink] {
        &self.floor_links
    }

    pub fn suffix_len(&self) -> usize {
        self.suffix_end - self.suffix_start
    }

    pub fn stats_len(&self) -> usize {
        self.stats_end - self.stats_start
    }

    /// Index of the next entry `next_entry` will return.
    pub fn next_ent(&self) -> usize {
        self.next_ent
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_ent == self.ent_count
    }

    /// Terms decoded so far.
    pub fn term_count(&self) -> usize {
        self.term_count
    }

    /// Sub-block pointers decoded so far.
    pub fn sub_block_count(&self) -> usize {
        self.sub_block_count
    }

    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.bytes[range]
    }

    pub fn summary(&self, prefix_len: usize, fp_orig: u64) -> BlockSummary {
        BlockSummary {
            prefix_len,
            fp: self.fp,
            fp_orig,
            fp_end: self.fp_end(),
            suffix_len: self.suffix_len() as u64,
            stats_len: self.stats_len() as u64,
            ent_count: self.ent_count,
            term_count: self.term_count,
            sub_block_count: self.sub_block_count,
        }
    }

    /// Go back to before the first entry.
    pub fn rewind(&mut self) {
        self.next_ent = 0;
        self.suffix_pos = self.suffix_start;
        self.stats_pos = self.stats_start;
        self.other_pos = self.other_start;
        self.term_count = 0;
        self.sub_block_count = 0;
    }

    /// Decode the next entry, or `None` once the block is exhausted.
    pub fn next_entry(&mut self) -> std::result::Result<Option<BlockEntry>, CorruptBlock> {
        if self.next_ent == self.ent_count {
            self.check_consumed()?;
            return Ok(None);
        }

        let fp = self.fp;
        let code = decode_varint(&self.bytes[..self.suffix_end], &mut self.suffix_pos)
            .ok_or_else(|| CorruptBlock::new(fp, "truncated suffix length"))?;
        let (len, is_sub_block) = if self.is_leaf {
            (code, false)
        } else {
            (code >> 1, code & 0x1 != 0)
        };
        let suffix_start = self.suffix_pos;
        let suffix_end = region_end(suffix_start, len, self.suffix_end)
            .ok_or_else(|| CorruptBlock::new(fp, "suffix overruns suffix region"))?;
        self.suffix_pos = suffix_end;

        let kind = if is_sub_block {
            let delta = decode_varint(&self.bytes, &mut self.other_pos)
                .ok_or_else(|| CorruptBlock::new(fp, "truncated sub-block pointer"))?;
            if delta == 0 || delta > fp {
                return Err(CorruptBlock::new(
                    fp,
                    format!("sub-block delta {} does not point before the block", delta),
                ));
            }
            self.sub_block_count += 1;
            EntryKind::SubBlock {
                child_fp: fp - delta,
            }
        } else {
            let payload_len = decode_varint(&self.bytes[..self.stats_end], &mut self.stats_pos)
                .ok_or_else(|| CorruptBlock::new(fp, "truncated stats length"))?;
            let start = self.stats_pos;
            let end = region_end(start, payload_len, self.stats_end)
                .ok_or_else(|| CorruptBlock::new(fp, "stats payload overruns stats region"))?;
            self.stats_pos = end;
            self.term_count += 1;
            EntryKind::Term { stats: start..end }
        };

        self.next_ent += 1;
        Ok(Some(BlockEntry {
            suffix: suffix_start..suffix_end,
            kind,
        }))
    }

    fn check_consumed(&self) -> std::result::Result<(), CorruptBlock> {
        if self.suffix_pos != self.suffix_end {
            return Err(CorruptBlock::new(
                self.fp,
                format!(
                    "{} unread suffix bytes after last entry",
                    self.suffix_end - self.suffix_pos
                ),
            ));
        }
        if self.stats_pos != self.stats_end {
            return Err(CorruptBlock::new(
                self.fp,
                format!(
                    "{} unread stats bytes after last entry",
                    self.stats_end - self.stats_pos
                ),
            ));
        }
        if self.other_pos != self.bytes.len() {
            return Err(CorruptBlock::new(
                self.fp,
                format!(
                    "{} unread trailing bytes after last entry",
                    self.bytes.len() - self.other_pos
                ),
            ));
        }
        Ok(())
    }
}
