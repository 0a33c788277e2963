use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use blocktree::blocktree::{SeekStatus, TermDictReader, TermDictWriter};
use blocktree::config::BlockTreeConfig;
use blocktree::postings::TermStats;
use blocktree::storage::{BlockStore, FileBlockStore, MemBlockStore};
use clap::{value_parser, Parser};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "blocktree-bench",
    about = "Term dictionary build, scan and seek benchmark"
)]
struct Cli {
    #[arg(long, default_value_t = 200_000, value_parser = value_parser!(u64).range(1..))]
    terms: u64,

    #[arg(long, default_value_t = 20_000)]
    seek_ops: u64,

    #[arg(long, default_value_t = 25)]
    min_items_in_block: usize,

    #[arg(long, default_value_t = 48)]
    max_items_in_block: usize,

    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,

    /// Build on disk instead of in memory
    #[arg(long)]
    on_disk: bool,

    #[arg(long)]
    keep_file: bool,
}

struct Stat {
    name: &'static str,
    ops: u64,
    elapsed: Duration,
    p50_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
}

fn percentile_ms(samples_ns: &[u128], num: usize, den: usize) -> f64 {
    if samples_ns.is_empty() {
        return 0.0;
    }
    let mut sorted = samples_ns.to_vec();
    sorted.sort_unstable();
    let idx = ((sorted.len() - 1) * num) / den;
    sorted[idx] as f64 / 1_000_000.0
}

fn measure<F>(name: &'static str, ops: u64, mut op: F) -> Stat
where
    F: FnMut() -> usize,
{
    let mut latencies = Vec::with_capacity(ops as usize);
    let start = Instant::now();
    let mut blackhole: usize = 0;

    for _ in 0..ops {
        let t0 = Instant::now();
        blackhole ^= op();
        latencies.push(t0.elapsed().as_nanos());
    }

    std::hint::black_box(blackhole);
    let elapsed = start.elapsed();

    Stat {
        name,
        ops,
        elapsed,
        p50_ms: percentile_ms(&latencies, 50, 100),
        p95_ms: percentile_ms(&latencies, 95, 100),
        p99_ms: percentile_ms(&latencies, 99, 100),
    }
}

/// Terms over a small alphabet so prefixes are shared and nodes get crowded.
fn random_term(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.gen_range(1..=12);
    (0..len).map(|_| b'a' + rng.gen_range(0..12u8)).collect()
}

fn random_terms(rng: &mut StdRng, count: u64) -> Vec<Vec<u8>> {
    let mut set = BTreeSet::new();
    while (set.len() as u64) < count {
        set.insert(random_term(rng));
    }
    set.into_iter().collect()
}

fn build<S: BlockStore>(store: S, terms: &[Vec<u8>], config: BlockTreeConfig) -> S {
    let mut dict = TermDictWriter::new(store, "_bench", config).expect("create writer failed");
    let mut field = dict.field("body").expect("open field failed");
    for (i, term) in terms.iter().enumerate() {
        let df = (i % 7) as u32 + 1;
        field
            .add(term, TermStats::new(df, df as u64 * 2))
            .expect("add term failed");
    }
    let stats = field.finish().expect("finish field failed");
    if let Some(stats) = stats {
        println!(
            "blocks={} floor_blocks={} index_bytes={}",
            stats.total_block_count(),
            stats.floor_block_count(),
            stats.index_num_bytes()
        );
    }
    dict.close().expect("close failed")
}

fn run<S: BlockStore>(store: S, cli: &Cli, terms: &[Vec<u8>], rng: &mut StdRng) -> Vec<Stat> {
    let bytes = store.len();
    let reader = TermDictReader::open(store).expect("open failed");
    let field = reader.field("body").expect("field missing");
    println!("dictionary_bytes={}", bytes);

    let scan_stat = measure("full_scan", 1, || {
        let mut terms_enum = field.iter();
        let mut count = 0;
        while terms_enum.next().expect("next failed").is_some() {
            count += 1;
        }
        assert_eq!(count, terms.len(), "scan lost terms");
        count
    });

    let exact_stat = measure("seek_exact_hit", cli.seek_ops, || {
        let term = &terms[rng.gen_range(0..terms.len())];
        let mut terms_enum = field.iter();
        assert!(terms_enum.seek_exact(term).expect("seek failed"));
        1
    });

    let miss_stat = measure("seek_exact_random", cli.seek_ops, || {
        let term = random_term(rng);
        let mut terms_enum = field.iter();
        terms_enum.seek_exact(&term).expect("seek failed") as usize
    });

    let ceil_stat = measure("seek_ceil_then_next_10", cli.seek_ops, || {
        let term = random_term(rng);
        let mut terms_enum = field.iter();
        let mut seen = match terms_enum.seek_ceil(&term).expect("seek failed") {
            SeekStatus::End => return 0,
            _ => 1,
        };
        while seen < 10 && terms_enum.next().expect("next failed").is_some() {
            seen += 1;
        }
        seen
    });

    let verify_stat = measure("compute_stats", 1, || {
        let stats = field.compute_stats().expect("verification failed");
        stats.total_block_count()
    });

    vec![scan_stat, exact_stat, miss_stat, ceil_stat, verify_stat]
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = BlockTreeConfig::new(cli.min_items_in_block, cli.max_items_in_block)
        .unwrap_or_else(|e| {
            eprintln!("error: {}", e);
            std::process::exit(2);
        });

    let mut rng = StdRng::seed_from_u64(cli.seed);

    println!("== Blocktree Term Dictionary Benchmark ==");
    println!(
        "config: terms={}, seek_ops={}, min_items_in_block={}, max_items_in_block={}, on_disk={}, rng_seed={}",
        cli.terms,
        cli.seek_ops,
        cli.min_items_in_block,
        cli.max_items_in_block,
        cli.on_disk,
        cli.seed
    );

    let gen_start = Instant::now();
    let terms = random_terms(&mut rng, cli.terms);
    println!(
        "generate_elapsed_ms={:.3}",
        gen_start.elapsed().as_secs_f64() * 1000.0
    );

    let mut path: Option<PathBuf> = None;
    let build_start = Instant::now();
    let stats = if cli.on_disk {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let file = PathBuf::from(format!(
            "/tmp/blocktree_bench_{}_{}.blk",
            std::process::id(),
            ts
        ));
        let store = FileBlockStore::create(&file).expect("create file failed");
        let store = build(store, &terms, config);
        println!(
            "build_elapsed_ms={:.3}",
            build_start.elapsed().as_secs_f64() * 1000.0
        );
        drop(store);
        let store = FileBlockStore::open(&file).expect("reopen file failed");
        path = Some(file);
        run(store, &cli, &terms, &mut rng)
    } else {
        let store = build(MemBlockStore::new(), &terms, config);
        println!(
            "build_elapsed_ms={:.3}",
            build_start.elapsed().as_secs_f64() * 1000.0
        );
        run(store, &cli, &terms, &mut rng)
    };

    println!();
    println!("name,ops,total_sec,ops_per_sec,p50_ms,p95_ms,p99_ms");
    for stat in stats {
        let total_sec = stat.elapsed.as_secs_f64();
        let ops_per_sec = if total_sec > 0.0 {
            stat.ops as f64 / total_sec
        } else {
            0.0
        };
        println!(
            "{},{},{:.6},{:.2},{:.4},{:.4},{:.4}",
            stat.name, stat.ops, total_sec, ops_per_sec, stat.p50_ms, stat.p95_ms, stat.p99_ms
        );
    }

    if let Some(path) = path {
        if cli.keep_file {
            println!("kept_path={}", path.display());
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }
}
