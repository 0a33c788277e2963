use std::fmt;

use serde_json::{json, Value};

use crate::error::{Result, TermDictError};

/// Shape of one physical block, as seen by the stats accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    pub prefix_len: usize,
    pub fp: u64,
    /// Start of the canonical fragment of the block's node.
    pub fp_orig: u64,
    pub fp_end: u64,
    pub suffix_len: u64,
    pub stats_len: u64,
    pub ent_count: usize,
    pub term_count: usize,
    pub sub_block_count: usize,
}

impl BlockSummary {
    pub fn block_len(&self) -> u64 {
        self.fp_end.saturating_sub(self.fp)
    }

    /// Bytes outside the suffix and stats regions: framing and sub-block pointers.
    pub fn other_bytes(&self) -> i64 {
        self.fp_end as i64 - self.fp as i64 - self.suffix_len as i64 - self.stats_len as i64
    }
}

/// Block-tree statistics for one field.
///
/// Fed block and term events by a single build or verification pass. `finish`
/// reconciles the counters; after that the accumulator is read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    segment: String,
    field: String,

    /// Byte size of the terms index.
    index_num_bytes: u64,

    total_term_count: u64,
    /// Sum of term lengths.
    total_term_bytes: u64,

    non_floor_block_count: usize,
    /// Floor nodes, counted once each through their canonical fragment.
    floor_block_count: usize,
    /// Every fragment of every floor node, canonical included.
    floor_sub_block_count: usize,
    /// Blocks holding terms and sub-blocks.
    mixed_block_count: usize,
    terms_only_block_count: usize,
    sub_blocks_only_block_count: usize,
    total_block_count: usize,

    block_count_by_prefix_len: Vec<usize>,
    start_block_count: usize,
    end_block_count: usize,

    total_block_suffix_bytes: u64,
    total_block_stats_bytes: u64,
    /// Framing and sub-block pointer bytes.
    total_block_other_bytes: u64,

    finished: bool,
}

impl Stats {
    pub fn new(segment: &str, field: &str) -> Self {
        Stats {
            segment: segment.to_string(),
            field: field.to_string(),
            index_num_bytes: 0,
            total_term_count: 0,
            total_term_bytes: 0,
            non_floor_block_count: 0,
            floor_block_count: 0,
            floor_sub_block_count: 0,
            mixed_block_count: 0,
            terms_only_block_count: 0,
            sub_blocks_only_block_count: 0,
            total_block_count: 0,
            block_count_by_prefix_len: vec![0; 10],
            start_block_count: 0,
            end_block_count: 0,
            total_block_suffix_bytes: 0,
            total_block_stats_bytes: 0,
            total_block_other_bytes: 0,
            finished: false,
        }
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.finished {
            return Err(TermDictError::IllegalState(format!(
                "{} on finished stats for field {}",
                op, self.field
            )));
        }
        Ok(())
    }

    pub fn set_index_num_bytes(&mut self, num_bytes: u64) -> Result<()> {
        self.ensure_open("set_index_num_bytes")?;
        self.index_num_bytes = num_bytes;
        Ok(())
    }

    pub fn start_block(&mut self, block: &BlockSummary, is_floor: bool) -> Result<()> {
        self.ensure_open("start_block")?;
        self.total_block_count += 1;
        if is_floor {
            if block.fp == block.fp_orig {
                self.floor_block_count += 1;
            }
            self.floor_sub_block_count += 1;
        } else {
            self.non_floor_block_count += 1;
        }

        if self.block_count_by_prefix_len.len() <= block.prefix_len {
            self.block_count_by_prefix_len.resize(block.prefix_len + 1, 0);
        }
        self.block_count_by_prefix_len[block.prefix_len] += 1;
        self.start_block_count += 1;
        self.total_block_suffix_bytes += block.suffix_len;
        self.total_block_stats_bytes += block.stats_len;
        Ok(())
    }

    pub fn end_block(&mut self, block: &BlockSummary) -> Result<()> {
        self.ensure_open("end_block")?;
        if block.term_count == 0 && block.sub_block_count == 0 {
            return Err(TermDictError::IllegalState(format!(
                "block at fp={} in field {} has neither terms nor sub-blocks",
                block.fp, self.field
            )));
        }

        let other_bytes = block.other_bytes();
        if other_bytes <= 0 {
            return Err(TermDictError::Corruption {
                segment: self.segment.clone(),
                field: self.field.clone(),
                fp: block.fp,
                reason: format!(
                    "{} other bytes (block_len={} suffix_len={} stats_len={})",
                    other_bytes,
                    block.block_len(),
                    block.suffix_len,
                    block.stats_len
                ),
            });
        }

        match (block.term_count, block.sub_block_count) {
            (0, _) => self.sub_blocks_only_block_count += 1,
            (_, 0) => self.terms_only_block_count += 1,
            (_, _) => self.mixed_block_count += 1,
        }
        self.end_block_count += 1;
        self.total_block_other_bytes += other_bytes as u64;
        self.total_term_count += block.term_count as u64;
        Ok(())
    }

    pub fn term(&mut self, term: &[u8]) -> Result<()> {
        self.ensure_open("term")?;
        self.total_term_bytes += term.len() as u64;
        Ok(())
    }

    /// Reconcile the counters and freeze the accumulator.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open("finish")?;
        if self.start_block_count != self.end_block_count {
            return Err(self.violation(format!(
                "start_block_count={} end_block_count={}",
                self.start_block_count, self.end_block_count
            )));
        }
        if self.total_block_count != self.floor_sub_block_count + self.non_floor_block_count {
            return Err(self.violation(format!(
                "total_block_count={} floor_sub_block_count={} non_floor_block_count={}",
                self.total_block_count, self.floor_sub_block_count, self.non_floor_block_count
            )));
        }
        if self.total_block_count
            != self.mixed_block_count + self.terms_only_block_count + self.sub_blocks_only_block_count
        {
            return Err(self.violation(format!(
                "total_block_count={} mixed_block_count={} terms_only_block_count={} \
                 sub_blocks_only_block_count={}",
                self.total_block_count,
                self.mixed_block_count,
                self.terms_only_block_count,
                self.sub_blocks_only_block_count
            )));
        }
        let by_prefix: usize = self.block_count_by_prefix_len.iter().sum();
        if by_prefix != self.total_block_count {
            return Err(self.violation(format!(
                "total_block_count={} but blocks by prefix length sum to {}",
                self.total_block_count, by_prefix
            )));
        }
        self.finished = true;
        Ok(())
    }

    fn violation(&self, detail: String) -> TermDictError {
        TermDictError::InvariantViolation {
            segment: self.segment.clone(),
            field: self.field.clone(),
            detail,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn index_num_bytes(&self) -> u64 {
        self.index_num_bytes
    }

    pub fn total_term_count(&self) -> u64 {
        self.total_term_count
    }

    pub fn total_term_bytes(&self) -> u64 {
        self.total_term_bytes
    }

    pub fn non_floor_block_count(&self) -> usize {
        self.non_floor_block_count
    }

    pub fn floor_block_count(&self) -> usize {
        self.floor_block_count
    }

    pub fn floor_sub_block_count(&self) -> usize {
        self.floor_sub_block_count
    }

    pub fn mixed_block_count(&self) -> usize {
        self.mixed_block_count
    }

    pub fn terms_only_block_count(&self) -> usize {
        self.terms_only_block_count
    }

    pub fn sub_blocks_only_block_count(&self) -> usize {
        self.sub_blocks_only_block_count
    }

    pub fn total_block_count(&self) -> usize {
        self.total_block_count
    }

    pub fn block_count_by_prefix_len(&self) -> &[usize] {
        &self.block_count_by_prefix_len
    }

    pub fn total_block_suffix_bytes(&self) -> u64 {
        self.total_block_suffix_bytes
    }

    pub fn total_block_stats_bytes(&self) -> u64 {
        self.total_block_stats_bytes
    }

    pub fn total_block_other_bytes(&self) -> u64 {
        self.total_block_other_bytes
    }

    /// Human-readable summary, identical to the `Display` output.
    pub fn report(&self) -> String {
        self.to_string()
    }

    pub fn to_json(&self) -> Value {
        let by_prefix: serde_json::Map<String, Value> = self
            .block_count_by_prefix_len
            .iter()
            .enumerate()
            .filter(|(_, &count)| count != 0)
            .map(|(len, &count)| (len.to_string(), json!(count)))
            .collect();
        json!({
            "segment": self.segment,
            "field": self.field,
            "index_num_bytes": self.index_num_bytes,
            "total_term_count": self.total_term_count,
            "total_term_bytes": self.total_term_bytes,
            "total_block_count": self.total_block_count,
            "terms_only_block_count": self.terms_only_block_count,
            "sub_blocks_only_block_count": self.sub_blocks_only_block_count,
            "mixed_block_count": self.mixed_block_count,
            "floor_block_count": self.floor_block_count,
            "non_floor_block_count": self.non_floor_block_count,
            "floor_sub_block_count": self.floor_sub_block_count,
            "total_block_suffix_bytes": self.total_block_suffix_bytes,
            "total_block_stats_bytes": self.total_block_stats_bytes,
            "total_block_other_bytes": self.total_block_other_bytes,
            "block_count_by_prefix_len": by_prefix,
        })
    }
}

fn per(total: u64, count: u64) -> Option<f64> {
    (count != 0).then(|| total as f64 / count as f64)
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "segment={} field={}", self.segment, self.field)?;
        writeln!(f, "  index FST:")?;
        writeln!(f, "    {} bytes", self.index_num_bytes)?;
        writeln!(f, "  terms:")?;
        writeln!(f, "    {} terms", self.total_term_count)?;
        write!(f, "    {} bytes", self.total_term_bytes)?;
        if let Some(avg) = per(self.total_term_bytes, self.total_term_count) {
            write!(f, " ({:.1} bytes/term)", avg)?;
        }
        writeln!(f)?;

        writeln!(f, "  blocks:")?;
        writeln!(f, "    {} blocks", self.total_block_count)?;
        writeln!(f, "    {} terms-only blocks", self.terms_only_block_count)?;
        writeln!(f, "    {} sub-block-only blocks", self.sub_blocks_only_block_count)?;
        writeln!(f, "    {} mixed blocks", self.mixed_block_count)?;
        writeln!(f, "    {} floor blocks", self.floor_block_count)?;
        writeln!(f, "    {} non-floor blocks", self.non_floor_block_count)?;
        writeln!(f, "    {} floor sub-blocks", self.floor_sub_block_count)?;

        let blocks = self.total_block_count as u64;
        for (total, label, unit) in [
            (self.total_block_suffix_bytes, "term suffix bytes", "suffix-bytes/block"),
            (self.total_block_stats_bytes, "term stats bytes", "stats-bytes/block"),
            (self.total_block_other_bytes, "other bytes", "other-bytes/block"),
        ] {
            write!(f, "    {} {}", total, label)?;
            if let Some(avg) = per(total, blocks) {
                write!(f, " ({:.1} {})", avg, unit)?;
            }
            writeln!(f)?;
        }

        if self.total_block_count != 0 {
            writeln!(f, "    by prefix length:")?;
            for (prefix_len, &count) in self.block_count_by_prefix_len.iter().enumerate() {
                if count != 0 {
                    writeln!(f, "      {:2}: {}", prefix_len, count)?;
                }
            }
        }
        Ok(())
    }
}
