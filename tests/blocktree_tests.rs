use blocktree::blocktree::{SeekStatus, Stats, TermDictReader, TermDictWriter};
use blocktree::config::BlockTreeConfig;
use blocktree::error::TermDictError;
use blocktree::postings::{
    InlinePostingsReader, InlinePostingsWriter, StatsOnlyReader, TermStats,
};
use blocktree::storage::{BlockStore, FileBlockStore, MemBlockStore};
use tempfile::TempDir;

fn config(min: usize, max: usize) -> BlockTreeConfig {
    BlockTreeConfig::new(min, max).unwrap()
}

fn stats_for(i: usize) -> TermStats {
    let df = (i % 5) as u32 + 1;
    TermStats::new(df, df as u64 + (i % 3) as u64)
}

/// Build one field "body" and return the reopened dictionary plus build-side stats.
fn build(terms: &[&[u8]], min: usize, max: usize) -> (TermDictReader<MemBlockStore>, Stats) {
    let mut dict = TermDictWriter::new(MemBlockStore::new(), "_0", config(min, max)).unwrap();
    let mut field = dict.field("body").unwrap();
    for (i, term) in terms.iter().enumerate() {
        field.add(term, stats_for(i)).unwrap();
    }
    let stats = field.finish().unwrap().unwrap();
    let reader = TermDictReader::open(dict.close().unwrap()).unwrap();
    (reader, stats)
}

fn cat_dog_dogs() -> TermDictReader<MemBlockStore> {
    build(&[b"cat", b"dog", b"dogs"], 2, 2).0
}

#[test]
fn test_enumerates_in_order() {
    let reader = cat_dog_dogs();
    let body = reader.field("body").unwrap();
    let mut terms_enum = body.iter();
    assert_eq!(terms_enum.term(), None);
    assert_eq!(terms_enum.next().unwrap(), Some(&b"cat"[..]));
    assert_eq!(
        terms_enum.term_state(&StatsOnlyReader).unwrap(),
        stats_for(0)
    );
    assert_eq!(terms_enum.next().unwrap(), Some(&b"dog"[..]));
    assert_eq!(terms_enum.next().unwrap(), Some(&b"dogs"[..]));
    assert_eq!(
        terms_enum.term_state(&StatsOnlyReader).unwrap(),
        stats_for(2)
    );
    assert_eq!(terms_enum.next().unwrap(), None);
    assert_eq!(terms_enum.next().unwrap(), None);
    assert_eq!(terms_enum.term(), None);
    assert!(matches!(
        terms_enum.stats_bytes(),
        Err(TermDictError::IllegalState(_))
    ));
}

#[test]
fn test_seek_ceil() {
    let reader = cat_dog_dogs();
    let body = reader.field("body").unwrap();
    let cases: Vec<(&[u8], SeekStatus, Option<&[u8]>)> = vec![
        (&b""[..], SeekStatus::NotFound, Some(&b"cat"[..])),
        (&b"a"[..], SeekStatus::NotFound, Some(&b"cat"[..])),
        (&b"cat"[..], SeekStatus::Found, Some(&b"cat"[..])),
        (&b"cb"[..], SeekStatus::NotFound, Some(&b"dog"[..])),
        (&b"do"[..], SeekStatus::NotFound, Some(&b"dog"[..])),
        (&b"dog"[..], SeekStatus::Found, Some(&b"dog"[..])),
        (&b"doga"[..], SeekStatus::NotFound, Some(&b"dogs"[..])),
        (&b"dogs"[..], SeekStatus::Found, Some(&b"dogs"[..])),
        (&b"dogt"[..], SeekStatus::End, None),
        (&b"zebra"[..], SeekStatus::End, None),
    ];

    let mut terms_enum = body.iter();
    for (target, status, term) in cases {
        assert_eq!(
            terms_enum.seek_ceil(target).unwrap(),
            status,
            "seek_ceil({:?})",
            String::from_utf8_lossy(target)
        );
        assert_eq!(terms_enum.term(), term);
    }
}

#[test]
fn test_next_continues_after_seek() {
    let reader = cat_dog_dogs();
    let body = reader.field("body").unwrap();
    let mut terms_enum = body.iter();

    assert_eq!(terms_enum.seek_ceil(b"cb").unwrap(), SeekStatus::NotFound);
    assert_eq!(terms_enum.next().unwrap(), Some(&b"dogs"[..]));
    assert_eq!(terms_enum.next().unwrap(), None);

    // The root frame above "dog" is only read when enumeration climbs back.
    assert_eq!(terms_enum.seek_ceil(b"doga").unwrap(), SeekStatus::NotFound);
    assert_eq!(terms_enum.next().unwrap(), None);

    assert!(terms_enum.seek_exact(b"cat").unwrap());
    assert_eq!(terms_enum.next().unwrap(), Some(&b"dog"[..]));
}

#[test]
fn test_seek_exact() {
    let reader = cat_dog_dogs();
    let body = reader.field("body").unwrap();
    let mut terms_enum = body.iter();

    assert!(terms_enum.seek_exact(b"dog").unwrap());
    assert_eq!(terms_enum.term(), Some(&b"dog"[..]));
    assert_eq!(
        terms_enum.term_state(&StatsOnlyReader).unwrap(),
        stats_for(1)
    );

    for missing in [&b"a"[..], &b"cab"[..], &b"do"[..], &b"dogsx"[..], &b"zzz"[..]] {
        assert!(!terms_enum.seek_exact(missing).unwrap());
        assert_eq!(terms_enum.term(), None);
        assert!(matches!(
            terms_enum.next(),
            Err(TermDictError::IllegalState(_))
        ));
    }

    // A new seek repositions the enumerator.
    assert!(terms_enum.seek_exact(b"dogs").unwrap());
    assert_eq!(terms_enum.next().unwrap(), None);
}

#[test]
fn test_get_returns_payload() {
    let reader = cat_dog_dogs();
    let body = reader.field("body").unwrap();
    let payload = body.get(b"dogs").unwrap().unwrap();
    let mut offset = 0;
    assert_eq!(
        TermStats::decode(&payload, &mut offset).unwrap(),
        stats_for(2)
    );
    assert_eq!(body.get(b"dogz").unwrap(), None);
}

#[test]
fn test_empty_and_binary_terms() {
    let terms: &[&[u8]] = &[b"", b"\x00", b"\x00\x00", b"a", b"a\xff", b"\xff"];
    let (reader, _) = build(terms, 2, 2);
    let body = reader.field("body").unwrap();
    assert_eq!(body.min_term(), b"");
    assert_eq!(body.max_term(), b"\xff");

    let mut terms_enum = body.iter();
    let mut seen = Vec::new();
    while let Some(term) = terms_enum.next().unwrap() {
        seen.push(term.to_vec());
    }
    let expected: Vec<Vec<u8>> = terms.iter().map(|t| t.to_vec()).collect();
    assert_eq!(seen, expected);

    for term in terms {
        assert!(terms_enum.seek_exact(term).unwrap());
    }
    assert_eq!(terms_enum.seek_ceil(b"\x01").unwrap(), SeekStatus::NotFound);
    assert_eq!(terms_enum.term(), Some(&b"a"[..]));
}

#[test]
fn test_build_and_verification_stats_agree() {
    let mut terms = Vec::new();
    for a in b'a'..=b'c' {
        for b in b'a'..=b'l' {
            terms.push(vec![a, b]);
            for c in b'a'..=b'c' {
                terms.push(vec![a, b, c]);
            }
        }
    }
    let refs: Vec<&[u8]> = terms.iter().map(|t| t.as_slice()).collect();
    let (reader, build_stats) = build(&refs, 4, 8);

    let verified = reader.field("body").unwrap().compute_stats().unwrap();
    assert_eq!(verified, build_stats);
    assert_eq!(verified.total_term_count(), terms.len() as u64);
    assert!(verified.floor_block_count() > 0);
    assert_eq!(
        verified.total_block_count(),
        verified.floor_sub_block_count() + verified.non_floor_block_count()
    );
}

#[test]
fn test_stats_report_and_json() {
    let reader = cat_dog_dogs();
    let stats = reader.field("body").unwrap().compute_stats().unwrap();
    let report = stats.report();
    assert!(report.starts_with("segment=_0 field=body\n"));
    assert!(report.contains("  index FST:"));

    let json = stats.to_json();
    assert_eq!(json["total_term_count"], 3);
    assert_eq!(json["total_block_count"], 2);
    assert_eq!(json["mixed_block_count"], 1);
    assert_eq!(json["block_count_by_prefix_len"]["3"], 1);
}

#[test]
fn test_multiple_fields() {
    let mut dict =
        TermDictWriter::new(MemBlockStore::new(), "_1", BlockTreeConfig::default()).unwrap();
    let mut body = dict.field("body").unwrap();
    for (i, term) in ["apple", "banana", "cherry"].iter().enumerate() {
        body.add(term.as_bytes(), stats_for(i)).unwrap();
    }
    body.finish().unwrap();
    assert!(dict.field("empty").unwrap().finish().unwrap().is_none());
    let mut title = dict.field("title").unwrap();
    title.add(b"zebra", TermStats::new(1, 1)).unwrap();
    title.finish().unwrap();

    let reader = TermDictReader::open(dict.close().unwrap()).unwrap();
    assert_eq!(reader.segment(), "_1");
    assert_eq!(reader.field_names(), vec!["body", "title"]);
    assert!(matches!(
        reader.field("empty"),
        Err(TermDictError::FieldNotFound(_))
    ));

    let title = reader.field("title").unwrap();
    assert_eq!(title.num_terms(), 1);
    assert!(title.get(b"apple").unwrap().is_none());
    assert!(reader.field("body").unwrap().get(b"apple").unwrap().is_some());

    for field in reader.fields() {
        field.compute_stats().unwrap();
    }
}

#[test]
fn test_inline_postings() {
    let mut postings = InlinePostingsWriter::new();
    postings.add_occurrence(b"cat", 1, 0);
    postings.add_occurrence(b"dog", 1, 2);
    postings.add_occurrence(b"dog", 4, 0);
    postings.add_occurrence(b"dog", 4, 7);

    let mut dict =
        TermDictWriter::new(MemBlockStore::new(), "_0", BlockTreeConfig::default()).unwrap();
    let mut field = dict.field("body").unwrap();
    for term in postings.terms() {
        field.add_with(&term, &mut postings).unwrap();
    }
    field.finish().unwrap();
    assert!(postings.is_empty());

    let reader = TermDictReader::open(dict.close().unwrap()).unwrap();
    let body = reader.field("body").unwrap();
    let mut terms_enum = body.iter();
    assert!(terms_enum.seek_exact(b"dog").unwrap());
    let state = terms_enum.term_state(&InlinePostingsReader).unwrap();
    assert_eq!(state.stats, TermStats::new(2, 3));
    assert_eq!(state.postings.get(4).unwrap().positions, vec![0, 7]);
}

#[test]
fn test_file_store_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("_0.blk");

    let terms: Vec<String> = (0..500).map(|i| format!("term{:04}", i * 7)).collect();
    {
        let store = FileBlockStore::create(&path).unwrap();
        let mut dict = TermDictWriter::new(store, "_0", BlockTreeConfig::default()).unwrap();
        let mut field = dict.field("body").unwrap();
        for (i, term) in terms.iter().enumerate() {
            field.add(term.as_bytes(), stats_for(i)).unwrap();
        }
        field.finish().unwrap();
        let store = dict.close().unwrap();
        assert!(store.len() > 0);
    }

    let reader = TermDictReader::open(FileBlockStore::open(&path).unwrap()).unwrap();
    let body = reader.field("body").unwrap();
    assert_eq!(body.num_terms(), 500);

    let mut terms_enum = body.iter();
    assert!(terms_enum.seek_exact(b"term0700").unwrap());
    assert_eq!(
        terms_enum.term_state(&StatsOnlyReader).unwrap(),
        stats_for(100)
    );
    assert_eq!(terms_enum.seek_ceil(b"term0701").unwrap(), SeekStatus::NotFound);
    assert_eq!(terms_enum.term(), Some(&b"term0707"[..]));
    assert!(reader.store().cached_ranges() > 0);

    let stats = body.compute_stats().unwrap();
    assert_eq!(stats.total_term_count(), 500);
}

#[test]
fn test_concurrent_readers_share_one_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("_0.blk");

    let terms: Vec<String> = (0..5000).map(|i| format!("k{:05}", i * 3)).collect();
    {
        let store = FileBlockStore::create(&path).unwrap();
        let mut dict = TermDictWriter::new(store, "_0", config(4, 8)).unwrap();
        let mut field = dict.field("body").unwrap();
        for (i, term) in terms.iter().enumerate() {
            field.add(term.as_bytes(), stats_for(i)).unwrap();
        }
        field.finish().unwrap();
        dict.close().unwrap();
    }

    // A small cache keeps the threads evicting each other's ranges.
    let store = FileBlockStore::open_with_cache(&path, 16).unwrap();
    let reader = TermDictReader::open(store).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..8usize {
            let reader = &reader;
            let terms = &terms;
            scope.spawn(move || {
                let body = reader.field("body").unwrap();
                let mut terms_enum = body.iter();
                for i in (worker..terms.len()).step_by(37) {
                    assert!(terms_enum.seek_exact(terms[i].as_bytes()).unwrap());
                    assert_eq!(
                        terms_enum.term_state(&StatsOnlyReader).unwrap(),
                        stats_for(i)
                    );
                    let missing = format!("k{:05}", i * 3 + 1);
                    assert!(!terms_enum.seek_exact(missing.as_bytes()).unwrap());
                }

                let mut walk = body.iter();
                let mut count = 0;
                while let Some(term) = walk.next().unwrap() {
                    assert_eq!(term, terms[count].as_bytes());
                    count += 1;
                }
                assert_eq!(count, terms.len());
            });
        }
    });

    let stats = reader.field("body").unwrap().compute_stats().unwrap();
    assert_eq!(stats.total_term_count(), 5000);
}

#[test]
fn test_writer_refuses_non_empty_store() {
    let store = MemBlockStore::from_bytes(vec![1, 2, 3]);
    assert!(TermDictWriter::new(store, "_0", BlockTreeConfig::default()).is_err());
}
