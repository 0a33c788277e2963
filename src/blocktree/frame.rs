use tracing::debug;

use crate::blocktree::block::{BlockEntry, BlockReader, CorruptBlock, EntryKind, FloorLink};
use crate::blocktree::stats::Stats;
use crate::error::{Result, TermDictError};

/// Where frames get their blocks from.
pub(crate) trait BlockLoader {
    fn load_block(&self, fp: u64) -> Result<BlockReader>;

    fn corruption(&self, fp: u64, reason: String) -> TermDictError;

    fn lift(&self, err: CorruptBlock) -> TermDictError {
        self.corruption(err.fp, err.reason)
    }
}

/// One level of the enumeration stack: a dictionary node and the position inside
/// whichever of its fragments is loaded.
///
/// Frames live in an arena owned by the enumerator and are reset rather than
/// reallocated when the stack is rebuilt.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub(crate) prefix_len: usize,
    /// Canonical fragment of the node.
    pub(crate) fp_orig: u64,
    pub(crate) is_floor: bool,
    /// Whether the loaded fragment holds any term.
    pub(crate) has_terms: bool,
    block: Option<BlockReader>,
    floor_links: Vec<FloorLink>,
    /// Next entry of `floor_links` to load once the current fragment is exhausted.
    next_floor: usize,
    /// Floor flag the terms index recorded for this node, checked on load.
    expect_floor: Option<bool>,
    /// For a frame built from the terms index but not read yet: the child node to
    /// resume after, and the lead byte that selects the fragment holding it.
    resume: Option<(u64, Option<u8>)>,
}

impl Frame {
    pub(crate) fn reset(&mut self, prefix_len: usize, fp_orig: u64) {
        self.prefix_len = prefix_len;
        self.fp_orig = fp_orig;
        self.is_floor = false;
        self.has_terms = false;
        self.block = None;
        self.floor_links.clear();
        self.next_floor = 0;
        self.expect_floor = None;
        self.resume = None;
    }

    pub(crate) fn expect(&mut self, is_floor: bool, has_terms: bool) {
        self.expect_floor = Some(is_floor);
        self.has_terms = has_terms;
    }

    pub(crate) fn defer(&mut self, child_fp: u64, lead_label: Option<u8>) {
        self.resume = Some((child_fp, lead_label));
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.resume.is_some()
    }

    pub(crate) fn block(&self) -> Result<&BlockReader> {
        self.block
            .as_ref()
            .ok_or_else(|| TermDictError::IllegalState("frame has no loaded block".into()))
    }

    fn block_mut(&mut self) -> Result<&mut BlockReader> {
        self.block
            .as_mut()
            .ok_or_else(|| TermDictError::IllegalState("frame has no loaded block".into()))
    }

    /// Load the node's canonical fragment and its floor table.
    pub(crate) fn load_canonical(
        &mut self,
        loader: &impl BlockLoader,
        stats: Option<&mut Stats>,
    ) -> Result<()> {
        let block = loader.load_block(self.fp_orig)?;
        self.is_floor = !block.floor_links().is_empty();
        if let Some(expected) = self.expect_floor {
            if expected != self.is_floor {
                return Err(loader.corruption(
                    self.fp_orig,
                    format!(
                        "terms index says is_floor={} but block says {}",
                        expected, self.is_floor
                    ),
                ));
            }
        }
        self.floor_links.clear();
        self.floor_links.extend_from_slice(block.floor_links());
        self.next_floor = 0;
        if let Some(stats) = stats {
            stats.start_block(&block.summary(self.prefix_len, self.fp_orig), self.is_floor)?;
        }
        self.block = Some(block);
        Ok(())
    }

    /// Switch to the fragment whose entries cover `lead_label`. Assumes the
    /// canonical fragment is loaded and unread.
    pub(crate) fn load_fragment_for(
        &mut self,
        loader: &impl BlockLoader,
        lead_label: Option<u8>,
    ) -> Result<()> {
        let Some(label) = lead_label else {
            return Ok(());
        };
        let Some(idx) = self
            .floor_links
            .iter()
            .rposition(|link| link.lead_label <= label)
        else {
            return Ok(());
        };
        let link = self.floor_links[idx];
        self.block = Some(loader.load_block(self.fp_orig + link.offset)?);
        self.has_terms = link.has_terms;
        self.next_floor = idx + 1;
        debug!(
            fp_orig = self.fp_orig,
            fragment = idx + 1,
            lead_label = label,
            "jumped to floor fragment"
        );
        Ok(())
    }

    /// Position a deferred frame just past the sub-block entry of its child.
    pub(crate) fn resume(&mut self, loader: &impl BlockLoader) -> Result<()> {
        let Some((child_fp, lead_label)) = self.resume.take() else {
            return Ok(());
        };
        self.load_canonical(loader, None)?;
        self.load_fragment_for(loader, lead_label)?;
        let block = self.block_mut()?;
        while let Some(entry) = block.next_entry().map_err(|e| loader.lift(e))? {
            if entry.kind == (EntryKind::SubBlock { child_fp }) {
                return Ok(());
            }
        }
        Err(loader.corruption(
            self.fp_orig,
            format!("sub-block fp={} not found in its parent", child_fp),
        ))
    }

    /// Next entry of the node, crossing into the following floor fragment when the
    /// current one runs out. `None` once every fragment is exhausted.
    pub(crate) fn next_entry(
        &mut self,
        loader: &impl BlockLoader,
        mut stats: Option<&mut Stats>,
    ) -> Result<Option<BlockEntry>> {
        loop {
            let prefix_len = self.prefix_len;
            let fp_orig = self.fp_orig;
            let block = self
                .block
                .as_mut()
                .ok_or_else(|| TermDictError::IllegalState("frame has no loaded block".into()))?;
            if let Some(entry) = block.next_entry().map_err(|e| loader.lift(e))? {
                return Ok(Some(entry));
            }

            if let Some(stats) = stats.as_deref_mut() {
                stats.end_block(&block.summary(prefix_len, fp_orig))?;
            }
            let more = self.next_floor < self.floor_links.len();
            if more == block.is_last_in_floor() {
                return Err(loader.corruption(
                    block.fp(),
                    format!(
                        "fragment is_last_in_floor={} but {} floor fragments follow",
                        block.is_last_in_floor(),
                        self.floor_links.len() - self.next_floor
                    ),
                ));
            }
            if !more {
                return Ok(None);
            }

            let link = self.floor_links[self.next_floor];
            self.next_floor += 1;
            let next = loader.load_block(fp_orig + link.offset)?;
            debug!(fp_orig, fp = next.fp(), "loaded floor fragment");
            if let Some(stats) = stats.as_deref_mut() {
                stats.start_block(&next.summary(prefix_len, fp_orig), true)?;
            }
            self.has_terms = link.has_terms;
            self.block = Some(next);
        }
    }
}
