use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use blocktree::blocktree::{SeekStatus, Stats, TermDictReader, TermDictWriter};
use blocktree::config::BlockTreeConfig;
use blocktree::error::TermDictError;
use blocktree::postings::{PostingsReader, StatsOnlyReader, TermStats};
use blocktree::storage::{BlockStore, FileBlockStore};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_VERIFY_FAILED: i32 = 10;
const EXIT_FATAL_ERROR: i32 = 20;

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormatArg {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "blocktree-inspect", about = "Build, verify and query block-tree term dictionaries")]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormatArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a dictionary from a sorted term list (one term per line,
    /// optionally followed by a tab, doc_freq, a tab and total_term_freq)
    Build {
        /// Term list
        input: PathBuf,
        /// Dictionary file to create
        output: PathBuf,
        #[arg(long, default_value = "body")]
        field: String,
        #[arg(long, default_value = "_0")]
        segment: String,
        #[arg(long)]
        min_items_in_block: Option<usize>,
        #[arg(long)]
        max_items_in_block: Option<usize>,
    },
    /// Walk every block of every field (or one field) and report statistics
    Stats {
        path: PathBuf,
        #[arg(long)]
        field: Option<String>,
    },
    /// Print the terms of a field in order
    Dump {
        path: PathBuf,
        #[arg(long)]
        field: String,
        /// Start at the first term >= this
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Seek a field to a target term
    Seek {
        path: PathBuf,
        #[arg(long)]
        field: String,
        target: String,
        /// Exact lookup instead of ceiling
        #[arg(long)]
        exact: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FatalKind {
    ReadInput,
    Build,
    Open,
    Query,
}

impl FatalKind {
    fn as_str(self) -> &'static str {
        match self {
            FatalKind::ReadInput => "READ_INPUT_FAILED",
            FatalKind::Build => "BUILD_FAILED",
            FatalKind::Open => "OPEN_FAILED",
            FatalKind::Query => "QUERY_FAILED",
        }
    }
}

struct Failure {
    kind: FatalKind,
    error: TermDictError,
}

impl Failure {
    fn new(kind: FatalKind) -> impl FnOnce(TermDictError) -> Failure {
        move |error| Failure { kind, error }
    }
}

/// Corrupt or inconsistent data found while reading is a verification failure;
/// anything that stops the command from reading at all is fatal.
fn failure_exit_code(failure: &Failure) -> i32 {
    if failure.kind == FatalKind::Query && failure.error.is_fatal_for_field() {
        EXIT_VERIFY_FAILED
    } else {
        EXIT_FATAL_ERROR
    }
}

fn display_term(term: &[u8]) -> String {
    String::from_utf8_lossy(term).into_owned()
}

fn parse_term_line(line: &str, lineno: usize) -> Result<(Vec<u8>, TermStats), TermDictError> {
    let mut parts = line.split('\t');
    let term = parts.next().unwrap_or_default().as_bytes().to_vec();
    let mut number = |name: &str| -> Result<Option<u64>, TermDictError> {
        match parts.next() {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                TermDictError::MalformedInput(format!(
                    "line {}: {} {:?} is not a number",
                    lineno, name, raw
                ))
            }),
        }
    };
    let doc_freq = number("doc_freq")?.unwrap_or(1);
    let total_term_freq = number("total_term_freq")?.unwrap_or(doc_freq);
    let doc_freq = u32::try_from(doc_freq).map_err(|_| {
        TermDictError::MalformedInput(format!("line {}: doc_freq out of range", lineno))
    })?;
    Ok((term, TermStats::new(doc_freq, total_term_freq)))
}

fn run_build(
    input: &Path,
    output: &Path,
    field: &str,
    segment: &str,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<Value, Failure> {
    let text = fs::read_to_string(input).map_err(|e| Failure {
        kind: FatalKind::ReadInput,
        error: e.into(),
    })?;
    let mut terms = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        terms.push(parse_term_line(line, i + 1).map_err(Failure::new(FatalKind::ReadInput))?);
    }

    let defaults = BlockTreeConfig::default();
    let config = BlockTreeConfig::new(
        min.unwrap_or(defaults.min_items_in_block),
        max.unwrap_or(defaults.max_items_in_block),
    )
    .map_err(Failure::new(FatalKind::Build))?;

    let build = || -> blocktree::Result<(Option<Stats>, u64)> {
        let store = FileBlockStore::create(output)?;
        let mut dict = TermDictWriter::new(store, segment, config)?;
        let mut writer = dict.field(field)?;
        for (term, stats) in &terms {
            writer.add(term, *stats)?;
        }
        let stats = writer.finish()?;
        let store = dict.close()?;
        Ok((stats, store.len()))
    };
    let (stats, bytes) = build().map_err(Failure::new(FatalKind::Build))?;

    Ok(json!({
        "output": output.display().to_string(),
        "field": field,
        "terms": terms.len(),
        "bytes": bytes,
        "stats": stats.map(|s| s.to_json()),
    }))
}

fn open(path: &Path) -> Result<TermDictReader<FileBlockStore>, Failure> {
    FileBlockStore::open(path)
        .and_then(TermDictReader::open)
        .map_err(Failure::new(FatalKind::Open))
}

fn run_stats(path: &Path, field: Option<&str>) -> Result<Vec<Stats>, Failure> {
    let reader = open(path)?;
    let names: Vec<String> = match field {
        Some(name) => vec![name.to_string()],
        None => reader.field_names().into_iter().map(String::from).collect(),
    };
    let mut all = Vec::with_capacity(names.len());
    for name in &names {
        let stats = reader
            .field(name)
            .and_then(|terms| terms.compute_stats())
            .map_err(Failure::new(FatalKind::Query))?;
        all.push(stats);
    }
    Ok(all)
}

fn run_dump(
    path: &Path,
    field: &str,
    from: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<Value>, Failure> {
    let reader = open(path)?;
    let dump = || -> blocktree::Result<Vec<Value>> {
        let terms = reader.field(field)?;
        let mut terms_enum = terms.iter();
        let mut out = Vec::new();
        let limit = limit.unwrap_or(usize::MAX);
        if let Some(from) = from {
            if terms_enum.seek_ceil(from.as_bytes())? == SeekStatus::End {
                return Ok(out);
            }
            out.push(term_json(terms_enum.term().unwrap_or_default(), terms_enum.stats_bytes()?));
        }
        while out.len() < limit {
            let Some(term) = terms_enum.next()? else {
                break;
            };
            let term = term.to_vec();
            out.push(term_json(&term, terms_enum.stats_bytes()?));
        }
        out.truncate(limit);
        Ok(out)
    };
    dump().map_err(Failure::new(FatalKind::Query))
}

fn run_seek(path: &Path, field: &str, target: &str, exact: bool) -> Result<Value, Failure> {
    let reader = open(path)?;
    let seek = || -> blocktree::Result<Value> {
        let terms = reader.field(field)?;
        let mut terms_enum = terms.iter();
        let status = if exact {
            if terms_enum.seek_exact(target.as_bytes())? {
                "found"
            } else {
                "not_found"
            }
        } else {
            match terms_enum.seek_ceil(target.as_bytes())? {
                SeekStatus::Found => "found",
                SeekStatus::NotFound => "not_found",
                SeekStatus::End => "end",
            }
        };
        let term = match terms_enum.term() {
            Some(term) => term_json(term, terms_enum.stats_bytes()?),
            None => Value::Null,
        };
        Ok(json!({ "target": target, "status": status, "term": term }))
    };
    seek().map_err(Failure::new(FatalKind::Query))
}

fn term_json(term: &[u8], payload: &[u8]) -> Value {
    match StatsOnlyReader.read_term_stats(payload) {
        Ok(stats) => json!({
            "term": display_term(term),
            "doc_freq": stats.doc_freq,
            "total_term_freq": stats.total_term_freq,
        }),
        Err(_) => json!({ "term": display_term(term), "payload_bytes": payload.len() }),
    }
}

fn term_line(value: &Value) -> String {
    let term = value["term"].as_str().unwrap_or_default();
    match (value.get("doc_freq"), value.get("total_term_freq")) {
        (Some(df), Some(ttf)) => format!("{}\t{}\t{}", term, df, ttf),
        _ => format!("{}\t<{} payload bytes>", term, value["payload_bytes"]),
    }
}

fn build_fatal_json(failure: &Failure) -> Value {
    json!({
        "schema_version": 1,
        "status": "fatal",
        "fatal_error": failure.error.to_string(),
        "fatal_error_code": failure.kind.as_str(),
        "exit_code": failure_exit_code(failure),
    })
}

fn build_success_json(result: Value) -> Value {
    json!({
        "schema_version": 1,
        "status": "ok",
        "result": result,
        "fatal_error": null,
        "fatal_error_code": null,
        "exit_code": EXIT_OK,
    })
}

fn fail_and_exit(format: &OutputFormatArg, failure: Failure) -> ! {
    match format {
        OutputFormatArg::Text => eprintln!("ERROR: {}", failure.error),
        OutputFormatArg::Json => println!("{}", build_fatal_json(&failure)),
    }
    process::exit(failure_exit_code(&failure));
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format.clone();

    match cli.command {
        Command::Build {
            input,
            output,
            field,
            segment,
            min_items_in_block,
            max_items_in_block,
        } => {
            let report = run_build(
                &input,
                &output,
                &field,
                &segment,
                min_items_in_block,
                max_items_in_block,
            )
            .unwrap_or_else(|f| fail_and_exit(&format, f));
            match format {
                OutputFormatArg::Text => {
                    println!(
                        "wrote {} terms to {} ({} bytes)",
                        report["terms"],
                        output.display(),
                        report["bytes"]
                    );
                }
                OutputFormatArg::Json => println!("{}", build_success_json(report)),
            }
        }
        Command::Stats { path, field } => {
            let all = run_stats(&path, field.as_deref())
                .unwrap_or_else(|f| fail_and_exit(&format, f));
            match format {
                OutputFormatArg::Text => {
                    for stats in &all {
                        print!("{}", stats);
                    }
                }
                OutputFormatArg::Json => {
                    let fields: Vec<Value> = all.iter().map(Stats::to_json).collect();
                    println!("{}", build_success_json(json!({ "fields": fields })));
                }
            }
        }
        Command::Dump {
            path,
            field,
            from,
            limit,
        } => {
            let terms = run_dump(&path, &field, from.as_deref(), limit)
                .unwrap_or_else(|f| fail_and_exit(&format, f));
            match format {
                OutputFormatArg::Text => {
                    for term in &terms {
                        println!("{}", term_line(term));
                    }
                }
                OutputFormatArg::Json => {
                    println!("{}", build_success_json(json!({ "terms": terms })));
                }
            }
        }
        Command::Seek {
            path,
            field,
            target,
            exact,
        } => {
            let result = run_seek(&path, &field, &target, exact)
                .unwrap_or_else(|f| fail_and_exit(&format, f));
            match format {
                OutputFormatArg::Text => {
                    let status = result["status"].as_str().unwrap_or_default();
                    if result["term"].is_null() {
                        println!("{}", status);
                    } else {
                        println!("{}\t{}", status, term_line(&result["term"]));
                    }
                }
                OutputFormatArg::Json => println!("{}", build_success_json(result)),
            }
        }
    }

    process::exit(EXIT_OK);
}
