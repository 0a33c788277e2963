/// Ordered enumeration and seeking over one field's block tree.
///
/// The enumerator keeps an explicit stack of frames, one per node on the path from
/// the root to the current term. `next` walks depth-first: sub-block entries push a
/// frame, exhausted frames (all floor fragments read) pop back to their parent.
///
/// A seek asks the terms index for every node whose prefix is a prefix of the
/// target. Only the deepest one is read; the frames above it are deferred and
/// positioned lazily, right after their child, if enumeration ever pops back up.
use std::cmp::Ordering;
use std::ops::Range;

use crate::blocktree::block::EntryKind;
use crate::blocktree::frame::{BlockLoader, Frame};
use crate::blocktree::reader::FieldTerms;
use crate::blocktree::stats::Stats;
use crate::error::{Result, TermDictError};
use crate::postings::PostingsReader;
use crate::storage::BlockStore;

/// Outcome of `seek_ceil`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStatus {
    /// Positioned on the target itself.
    Found,
    /// Positioned on the smallest term greater than the target.
    NotFound,
    /// Every term is smaller than the target.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Fresh: `next` starts at the first term.
    Start,
    Positioned,
    /// Past the last term.
    Exhausted,
    /// After a failed `seek_exact`; only a seek is allowed.
    Unpositioned,
}

pub struct TermsEnum<'a, S: BlockStore> {
    terms: FieldTerms<'a, S>,
    frames: Vec<Frame>,
    depth: usize,
    term: Vec<u8>,
    stats_range: Option<Range<usize>>,
    state: State,
}

impl<'a, S: BlockStore> TermsEnum<'a, S> {
    pub(crate) fn new(terms: FieldTerms<'a, S>) -> Self {
        TermsEnum {
            terms,
            frames: Vec::new(),
            depth: 0,
            term: Vec::new(),
            stats_range: None,
            state: State::Start,
        }
    }

    /// The current term, if positioned.
    pub fn term(&self) -> Option<&[u8]> {
        match self.state {
            State::Positioned => Some(self.term.as_slice()),
            _ => None,
        }
    }

    /// Stats payload of the current term.
    pub fn stats_bytes(&self) -> Result<&[u8]> {
        match (&self.stats_range, self.state) {
            (Some(range), State::Positioned) => {
                Ok(self.frames[self.depth - 1].block()?.slice(range.clone()))
            }
            _ => Err(TermDictError::IllegalState(
                "terms enum is not positioned on a term".into(),
            )),
        }
    }

    /// Decode the current term's payload.
    pub fn term_state<P: PostingsReader>(&self, postings: &P) -> Result<P::TermState> {
        postings.read_term_stats(self.stats_bytes()?)
    }

    /// Advance to the next term in byte order. `None` once past the last term.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<&[u8]>> {
        match self.state {
            State::Unpositioned => {
                return Err(TermDictError::IllegalState(
                    "next() after an unsuccessful seek_exact; seek first".into(),
                ))
            }
            State::Exhausted => return Ok(None),
            State::Start => self.push_root(None)?,
            State::Positioned => {}
        }
        if self.advance(None)? {
            Ok(Some(self.term.as_slice()))
        } else {
            Ok(None)
        }
    }

    /// Position on the smallest term `>= target`.
    pub fn seek_ceil(&mut self, target: &[u8]) -> Result<SeekStatus> {
        self.clear();
        if target > self.terms.max_term() {
            self.state = State::Exhausted;
            return Ok(SeekStatus::End);
        }
        self.push_path(target)?;
        self.scan_to_ceil(target)
    }

    /// Position on `target` if it is present. On `false` the enumerator is left
    /// unpositioned.
    pub fn seek_exact(&mut self, target: &[u8]) -> Result<bool> {
        self.clear();
        if target < self.terms.min_term() || target > self.terms.max_term() {
            return Ok(false);
        }
        self.push_path(target)?;
        // The deepest node on the path is the only one that can hold the target.
        let found = self.frames[self.depth - 1].has_terms
            && self.scan_to_ceil(target)? == SeekStatus::Found;
        if !found {
            self.clear();
        }
        Ok(found)
    }

    fn clear(&mut self) {
        self.depth = 0;
        self.term.clear();
        self.stats_range = None;
        self.state = State::Unpositioned;
    }

    fn push_frame(&mut self, prefix_len: usize, fp_orig: u64) -> &mut Frame {
        if self.depth == self.frames.len() {
            self.frames.push(Frame::default());
        }
        let frame = &mut self.frames[self.depth];
        frame.reset(prefix_len, fp_orig);
        self.depth += 1;
        frame
    }

    fn push_root(&mut self, stats: Option<&mut Stats>) -> Result<()> {
        self.clear();
        let terms = self.terms;
        let root = terms.root();
        let frame = self.push_frame(0, root.fp);
        frame.expect(root.is_floor, root.has_terms);
        frame.load_canonical(&terms, stats)?;
        Ok(())
    }

    /// Push one frame per indexed node along `target`, read the deepest one and
    /// point it at the fragment covering the target.
    fn push_path(&mut self, target: &[u8]) -> Result<()> {
        let terms = self.terms;
        let path = terms.index().lookup_path(target);
        match path.first() {
            Some(&(0, root)) if root == terms.root() => {}
            _ => {
                return Err(terms.corruption(
                    terms.root().fp,
                    "terms index has no entry for the root block".into(),
                ))
            }
        }

        for (i, &(prefix_len, pointer)) in path.iter().enumerate() {
            let child = path.get(i + 1).map(|&(_, child)| child.fp);
            let frame = self.push_frame(prefix_len, pointer.fp);
            frame.expect(pointer.is_floor, pointer.has_terms);
            if let Some(child_fp) = child {
                frame.defer(child_fp, target.get(prefix_len).copied());
            }
        }

        let frame = &mut self.frames[self.depth - 1];
        let prefix_len = frame.prefix_len;
        frame.load_canonical(&terms, None)?;
        frame.load_fragment_for(&terms, target.get(prefix_len).copied())?;
        self.term.extend_from_slice(&target[..prefix_len]);
        Ok(())
    }

    /// Scan forward from the top frame until reaching the first term `>= target`.
    fn scan_to_ceil(&mut self, target: &[u8]) -> Result<SeekStatus> {
        let terms = self.terms;
        loop {
            let frame = &mut self.frames[self.depth - 1];
            let prefix_len = frame.prefix_len;
            // Running out of entries means everything left in this node sorts
            // before the target: the ceiling is simply the next term in order.
            let Some(entry) = frame.next_entry(&terms, None)? else {
                return self.advance_to_ceil();
            };

            let target_suffix = &target[prefix_len..];
            let suffix = frame.block()?.slice(entry.suffix.clone());
            match entry.kind {
                EntryKind::Term { stats } => match suffix.cmp(target_suffix) {
                    Ordering::Less => continue,
                    ord => {
                        self.term.truncate(prefix_len);
                        self.term.extend_from_slice(suffix);
                        self.stats_range = Some(stats);
                        self.state = State::Positioned;
                        return Ok(if ord == Ordering::Equal {
                            SeekStatus::Found
                        } else {
                            SeekStatus::NotFound
                        });
                    }
                },
                EntryKind::SubBlock { child_fp } => {
                    let descend = target_suffix.starts_with(suffix);
                    if !descend && suffix < target_suffix {
                        continue;
                    }
                    self.term.truncate(prefix_len);
                    self.term.extend_from_slice(suffix);
                    let child_prefix = self.term.len();
                    let frame = self.push_frame(child_prefix, child_fp);
                    frame.load_canonical(&terms, None)?;
                    if !descend {
                        // Every term below sorts after the target.
                        return self.advance_to_ceil();
                    }
                    frame.load_fragment_for(&terms, target.get(child_prefix).copied())?;
                }
            }
        }
    }

    fn advance_to_ceil(&mut self) -> Result<SeekStatus> {
        if self.advance(None)? {
            Ok(SeekStatus::NotFound)
        } else {
            Ok(SeekStatus::End)
        }
    }

    /// Move to the next term from the current stack. Returns false, leaving the
    /// enumerator exhausted, when the stack empties.
    fn advance(&mut self, mut stats: Option<&mut Stats>) -> Result<bool> {
        let terms = self.terms;
        loop {
            if self.depth == 0 {
                self.term.clear();
                self.stats_range = None;
                self.state = State::Exhausted;
                return Ok(false);
            }

            let frame = &mut self.frames[self.depth - 1];
            if frame.is_deferred() {
                frame.resume(&terms)?;
            }
            let Some(entry) = frame.next_entry(&terms, stats.as_deref_mut())? else {
                self.depth -= 1;
                continue;
            };

            let prefix_len = frame.prefix_len;
            self.term.truncate(prefix_len);
            self.term
                .extend_from_slice(frame.block()?.slice(entry.suffix.clone()));
            match entry.kind {
                EntryKind::Term { stats: range } => {
                    if let Some(stats) = stats.as_deref_mut() {
                        stats.term(&self.term)?;
                    }
                    self.stats_range = Some(range);
                    self.state = State::Positioned;
                    return Ok(true);
                }
                EntryKind::SubBlock { child_fp } => {
                    let child_prefix = self.term.len();
                    let frame = self.push_frame(child_prefix, child_fp);
                    frame.load_canonical(&terms, stats.as_deref_mut())?;
                }
            }
        }
    }

    /// Walk every block and term from the root, feeding `stats`, and check the
    /// terms come out strictly increasing and match the field's recorded totals.
    pub(crate) fn verify_into(&mut self, stats: &mut Stats) -> Result<()> {
        let terms = self.terms;
        self.push_root(Some(&mut *stats))?;

        let mut previous: Option<Vec<u8>> = None;
        let mut count = 0u64;
        let mut bytes = 0u64;
        while self.advance(Some(&mut *stats))? {
            if let Some(prev) = &previous {
                if self.term.as_slice() <= prev.as_slice() {
                    return Err(terms.violation(format!(
                        "term {:?} enumerated after {:?}",
                        String::from_utf8_lossy(&self.term),
                        String::from_utf8_lossy(prev)
                    )));
                }
            }
            count += 1;
            bytes += self.term.len() as u64;
            match &mut previous {
                Some(prev) => {
                    prev.clear();
                    prev.extend_from_slice(&self.term);
                }
                None => previous = Some(self.term.clone()),
            }
        }

        if count != terms.num_terms() || bytes != terms.total_term_bytes() {
            return Err(terms.violation(format!(
                "enumerated {} terms / {} bytes; directory records {} / {}",
                count,
                bytes,
                terms.num_terms(),
                terms.total_term_bytes()
            )));
        }
        Ok(())
    }
}
