/// Floor splitting: deciding how one node's entries map onto physical blocks.
///
/// A node gathers every pending entry sharing `prefix`. When there are more than
/// `max_items_in_block` of them, the node is written as several "floor" fragments:
/// the canonical fragment (addressed by the parent and the terms index) followed by
/// follow-on fragments, each tagged with the lead byte of its first entry so a seek
/// can jump straight to the right one.
///
/// Fragment boundaries only fall where the lead byte (the first suffix byte)
/// changes. The segmenter is greedy: it closes a fragment as soon as it holds at
/// least `min_items_in_block` entries and more than `max_items_in_block` remain,
/// which can leave a small final fragment.
use std::ops::Range;

use crate::error::{Result, TermDictError};

/// What the splitter needs to know about one pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryShape {
    /// First byte after the node prefix; `None` for a term equal to the prefix.
    pub lead_label: Option<u8>,
    pub is_term: bool,
}

/// One physical block of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Entry range, relative to the node's first entry.
    pub entries: Range<usize>,
    /// Lead byte of the first entry; `None` only for the canonical fragment.
    pub lead_label: Option<u8>,
    pub has_terms: bool,
    pub has_sub_blocks: bool,
}

impl Fragment {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Partition a node's entries into fragments.
///
/// Entries must arrive in the node's sort order: lead labels non-decreasing, and a
/// term equal to the prefix (lead label `None`) only in first position.
pub fn plan_fragments(
    entries: &[EntryShape],
    min_items_in_block: usize,
    max_items_in_block: usize,
) -> Result<Vec<Fragment>> {
    if entries.is_empty() {
        return Err(TermDictError::IllegalState(
            "cannot write a dictionary node without entries".into(),
        ));
    }

    let count = entries.len();
    let mut fragments = Vec::new();
    let mut last_lead: Option<Option<u8>> = None;
    let mut next_start = 0;
    let mut next_lead_label = None;
    let mut has_terms = false;
    let mut has_sub_blocks = false;

    for (i, entry) in entries.iter().enumerate() {
        if let Some(prev) = last_lead {
            if entry.lead_label < prev {
                return Err(TermDictError::IllegalState(format!(
                    "node entries out of order at {}: lead {:?} after {:?}",
                    i, entry.lead_label, prev
                )));
            }
            if entry.lead_label.is_none() {
                return Err(TermDictError::IllegalState(
                    "a term equal to the node prefix must be the node's first entry".into(),
                ));
            }
        }

        if last_lead != Some(entry.lead_label) {
            let items_in_fragment = i - next_start;
            if items_in_fragment >= min_items_in_block && count - next_start > max_items_in_block
            {
                fragments.push(Fragment {
                    entries: next_start..i,
                    lead_label: next_lead_label,
                    has_terms,
                    has_sub_blocks,
                });
                has_terms = false;
                has_sub_blocks = false;
                next_lead_label = entry.lead_label;
                next_start = i;
            }
            last_lead = Some(entry.lead_label);
        }

        if entry.is_term {
            has_terms = true;
        } else {
            has_sub_blocks = true;
        }
    }

    fragments.push(Fragment {
        entries: next_start..count,
        lead_label: next_lead_label,
        has_terms,
        has_sub_blocks,
    });

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(labels: &[u8]) -> Vec<EntryShape> {
        labels
            .iter()
            .map(|&b| EntryShape {
                lead_label: Some(b),
                is_term: true,
            })
            .collect()
    }

    #[test]
    fn test_small_node_is_single_fragment() {
        let plan = plan_fragments(&terms(b"abc"), 2, 4).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].entries, 0..3);
        assert_eq!(plan[0].lead_label, None);
        assert!(plan[0].has_terms);
        assert!(!plan[0].has_sub_blocks);
    }

    #[test]
    fn test_single_entry_never_floors() {
        let single = [EntryShape {
            lead_label: None,
            is_term: true,
        }];
        let plan = plan_fragments(&single, 2, 2).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_splits_into_bounded_fragments() {
        let labels: Vec<u8> = (b'a'..=b'z').collect();
        let plan = plan_fragments(&terms(&labels), 4, 8).unwrap();
        assert!(plan.len() > 1);

        let total: usize = plan.iter().map(|f| f.len()).sum();
        assert_eq!(total, 26);
        for (i, fragment) in plan.iter().enumerate() {
            assert!(fragment.len() <= 8, "fragment {} too large", i);
            if i + 1 < plan.len() {
                assert!(fragment.len() >= 4, "fragment {} too small", i);
            }
            if i == 0 {
                assert_eq!(fragment.lead_label, None);
            } else {
                assert_eq!(fragment.lead_label, Some(labels[fragment.entries.start]));
            }
        }
        // Fragments tile the entries without gaps.
        for pair in plan.windows(2) {
            assert_eq!(pair[0].entries.end, pair[1].entries.start);
        }
    }

    #[test]
    fn test_never_splits_inside_a_lead_label_run() {
        // Runs of equal lead labels: a a a b b b c c c d d d
        let labels = b"aaabbbcccddd";
        let plan = plan_fragments(&terms(labels), 2, 4).unwrap();
        for fragment in &plan[1..] {
            let start = fragment.entries.start;
            assert_ne!(labels[start - 1], labels[start]);
        }
    }

    #[test]
    fn test_tracks_sub_blocks_per_fragment() {
        let mut entries = terms(b"abcd");
        entries.extend((b'e'..=b'h').map(|b| EntryShape {
            lead_label: Some(b),
            is_term: false,
        }));
        let plan = plan_fragments(&entries, 2, 4).unwrap();
        assert!(plan.len() >= 2);
        assert!(plan[0].has_terms && !plan[0].has_sub_blocks);
        let last = plan.last().unwrap();
        assert!(!last.has_terms && last.has_sub_blocks);
    }

    #[test]
    fn test_empty_prefix_term_must_come_first() {
        let mut entries = terms(b"ab");
        entries.push(EntryShape {
            lead_label: None,
            is_term: true,
        });
        assert!(plan_fragments(&entries, 2, 4).is_err());
        assert!(plan_fragments(&[], 2, 4).is_err());
    }
}
