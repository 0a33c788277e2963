/// Property tests for the block-tree term dictionary.
///
/// Builds dictionaries from randomized term sets under several block-size settings
/// and checks:
/// - Enumeration yields every term, in order, exactly once
/// - seek_ceil / seek_exact agree with a BTreeSet model
/// - Build-side and verification-side statistics agree
/// - Every physical block respects the configured size bounds
use std::collections::BTreeSet;

use blocktree::blocktree::block::{peek_block_len, BlockReader};
use blocktree::blocktree::{SeekStatus, Stats, TermDictReader, TermDictWriter};
use blocktree::config::BlockTreeConfig;
use blocktree::postings::{StatsOnlyReader, TermStats};
use blocktree::storage::{BlockStore, MemBlockStore};

/// Simple deterministic PRNG (xorshift64) for reproducible tests.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
    fn next_range(&mut self, max: u64) -> u64 {
        self.next() % max
    }
}

const ALPHABET: &[u8] = b"abcde\x00\xff";

fn random_term(rng: &mut Rng) -> Vec<u8> {
    let len = rng.next_range(7) as usize;
    (0..len)
        .map(|_| ALPHABET[rng.next_range(ALPHABET.len() as u64) as usize])
        .collect()
}

fn random_terms(rng: &mut Rng, count: usize) -> BTreeSet<Vec<u8>> {
    let mut set = BTreeSet::new();
    // Bounded attempts: the alphabet can run out of short terms.
    for _ in 0..count * 4 {
        if set.len() == count {
            break;
        }
        set.insert(random_term(rng));
    }
    set
}

fn stats_of(term: &[u8]) -> TermStats {
    let df = term.len() as u32 + 1;
    TermStats::new(df, df as u64 + term.iter().map(|&b| b as u64).sum::<u64>())
}

fn build(
    terms: &BTreeSet<Vec<u8>>,
    config: BlockTreeConfig,
) -> (TermDictReader<MemBlockStore>, Stats) {
    let mut dict = TermDictWriter::new(MemBlockStore::new(), "_p", config).unwrap();
    let mut field = dict.field("f").unwrap();
    for term in terms {
        field.add(term, stats_of(term)).unwrap();
    }
    let stats = field.finish().unwrap().unwrap();
    (TermDictReader::open(dict.close().unwrap()).unwrap(), stats)
}

fn load_block(store: &MemBlockStore, fp: u64) -> BlockReader {
    let head = store.read_bytes(fp, 4).unwrap();
    let len = peek_block_len(fp, &head).unwrap();
    BlockReader::parse(fp, store.read_bytes(fp, len).unwrap()).unwrap()
}

// ── Invariant checkers ──

fn assert_enumeration(reader: &TermDictReader<MemBlockStore>, terms: &BTreeSet<Vec<u8>>) {
    let field = reader.field("f").unwrap();
    let mut terms_enum = field.iter();
    let mut seen = Vec::with_capacity(terms.len());
    while let Some(term) = terms_enum.next().unwrap() {
        seen.push(term.to_vec());
        assert_eq!(
            terms_enum.term_state(&StatsOnlyReader).unwrap(),
            stats_of(seen.last().unwrap())
        );
    }
    let expected: Vec<Vec<u8>> = terms.iter().cloned().collect();
    assert_eq!(seen, expected);
}

fn assert_seeks(
    reader: &TermDictReader<MemBlockStore>,
    terms: &BTreeSet<Vec<u8>>,
    rng: &mut Rng,
    probes: usize,
) {
    let field = reader.field("f").unwrap();
    let all: Vec<&Vec<u8>> = terms.iter().collect();
    let mut terms_enum = field.iter();

    for _ in 0..probes {
        let target = if rng.next_range(2) == 0 {
            all[rng.next_range(all.len() as u64) as usize].clone()
        } else {
            random_term(rng)
        };

        let mut following = terms.range(target.clone()..);
        let status = terms_enum.seek_ceil(&target).unwrap();
        match following.next() {
            None => {
                assert_eq!(status, SeekStatus::End, "target {:?}", target);
                assert_eq!(terms_enum.term(), None);
            }
            Some(ceil) => {
                let expected = if *ceil == target {
                    SeekStatus::Found
                } else {
                    SeekStatus::NotFound
                };
                assert_eq!(status, expected, "target {:?}", target);
                assert_eq!(terms_enum.term(), Some(ceil.as_slice()));
                assert_eq!(
                    terms_enum.term_state(&StatsOnlyReader).unwrap(),
                    stats_of(ceil)
                );
                for next in following.by_ref().take(3) {
                    assert_eq!(terms_enum.next().unwrap(), Some(next.as_slice()));
                }
            }
        }

        let found = terms_enum.seek_exact(&target).unwrap();
        assert_eq!(found, terms.contains(&target), "seek_exact {:?}", target);
        if found {
            assert_eq!(terms_enum.term(), Some(target.as_slice()));
            assert_eq!(
                terms_enum.term_state(&StatsOnlyReader).unwrap(),
                stats_of(&target)
            );
        } else {
            assert_eq!(terms_enum.term(), None);
        }
    }
}

fn assert_block_bounds(reader: &TermDictReader<MemBlockStore>, config: BlockTreeConfig) {
    let field = reader.field("f").unwrap();
    let store = reader.store();
    for (prefix, pointer) in field.index().iter() {
        let canonical = load_block(store, pointer.fp);
        let links = canonical.floor_links().to_vec();
        assert_eq!(pointer.is_floor, !links.is_empty(), "prefix {:?}", prefix);
        assert!(canonical.ent_count() >= 1);
        assert!(
            canonical.ent_count() <= config.max_items_in_block,
            "prefix {:?} canonical fragment has {} entries",
            prefix,
            canonical.ent_count()
        );
        if !prefix.is_empty() && links.is_empty() {
            assert!(
                canonical.ent_count() >= config.min_items_in_block,
                "prefix {:?} has only {} entries",
                prefix,
                canonical.ent_count()
            );
        }

        for (i, link) in links.iter().enumerate() {
            let fragment = load_block(store, pointer.fp + link.offset);
            assert!(fragment.ent_count() >= 1);
            assert!(fragment.ent_count() <= config.max_items_in_block);
            assert_eq!(fragment.is_last_in_floor(), i + 1 == links.len());
            assert!(fragment.floor_links().is_empty());
        }
    }
}

fn run_workload(seed: u64, count: usize, min: usize, max: usize) {
    let config = BlockTreeConfig::new(min, max).unwrap();
    let mut rng = Rng::new(seed);
    let terms = random_terms(&mut rng, count);
    let (reader, build_stats) = build(&terms, config);

    assert_enumeration(&reader, &terms);
    assert_seeks(&reader, &terms, &mut rng, 300);
    assert_block_bounds(&reader, config);

    let verified = reader.field("f").unwrap().compute_stats().unwrap();
    assert_eq!(verified, build_stats);
    assert_eq!(verified.total_term_count(), terms.len() as u64);
    let bytes: usize = terms.iter().map(|t| t.len()).sum();
    assert_eq!(verified.total_term_bytes(), bytes as u64);
}

#[test]
fn test_tiny_blocks() {
    for seed in 1..=8 {
        run_workload(seed * 0x9E37_79B9, 200, 2, 2);
    }
}

#[test]
fn test_small_blocks() {
    for seed in 1..=6 {
        run_workload(seed * 0x5851_F42D, 800, 2, 4);
    }
}

#[test]
fn test_medium_blocks() {
    for seed in 1..=4 {
        run_workload(seed * 0x2545_F491, 2_000, 4, 8);
    }
}

#[test]
fn test_default_blocks() {
    run_workload(0xDEAD_BEEF, 5_000, 25, 48);
}

#[test]
fn test_single_and_few_terms() {
    for count in 1..=5 {
        run_workload(count as u64 * 31 + 7, count, 2, 2);
    }
}
