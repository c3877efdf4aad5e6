//! Smoke-test CLI for the `fuzzylink` library.
//!
//! Not part of the crate's correctness surface (see SPEC_FULL.md §1
//! "Crate identity") — a thin driver over [`fuzzylink::Store`] so the
//! library has a runnable entry point, in the spirit of the teacher's
//! `cq`/`cqs` binary over `cqs::Store`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use fuzzylink::{FinderConfig, IngestConfig, Store};

#[derive(Parser)]
#[command(name = "fuzzylink")]
#[command(about = "Fuzzy record matching over dirty, real-world data")]
#[command(version)]
struct Cli {
    /// Path to the SQLite store (omit for an in-memory store)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest records from a newline-delimited JSON file
    Ingest {
        /// Path to a JSONL file, one record object per line
        input: PathBuf,

        /// Column whose value uniquely identifies each record
        #[arg(long)]
        id_col: String,

        /// Columns to exclude from indexing and scoring
        #[arg(long, value_delimiter = ',')]
        ignore: Vec<String>,

        /// Columns to phonetically expand (default: all indexed columns)
        #[arg(long, value_delimiter = ',')]
        dmeta_cols: Option<Vec<String>>,

        #[arg(long, default_value_t = 10_000)]
        batch_size: usize,
    },

    /// Recompute per-column token proportions
    Rebuild,

    /// Find the most plausible matches for a single JSON query record
    Query {
        /// A JSON object, e.g. '{"first_name": "robin"}'
        record: String,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            input,
            id_col,
            ignore,
            dmeta_cols,
            batch_size,
        } => cmd_ingest(cli.db.as_deref(), &input, &id_col, ignore, dmeta_cols, batch_size),
        Commands::Rebuild => cmd_rebuild(cli.db.as_deref()),
        Commands::Query { record, limit } => cmd_query(cli.db.as_deref(), &record, limit),
    }
}

fn open_store(
    db: Option<&std::path::Path>,
    cols_to_ignore: Vec<String>,
    dmeta_cols: Option<Vec<String>>,
) -> Result<Store> {
    Store::open_or_create(db, cols_to_ignore, dmeta_cols).context("opening store")
}

fn cmd_ingest(
    db: Option<&std::path::Path>,
    input: &std::path::Path,
    id_col: &str,
    ignore: Vec<String>,
    dmeta_cols: Option<Vec<String>>,
    batch_size: usize,
) -> Result<()> {
    let store = open_store(db, ignore, dmeta_cols)?;

    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", input.display(), lineno + 1))?;
        let Some(obj) = value.as_object() else {
            bail!("{}:{}: expected a JSON object", input.display(), lineno + 1);
        };
        records.push(obj.clone());
    }

    let config = IngestConfig {
        batch_size,
        write_counters_now: true,
    };
    let report = store.write_records(records, id_col, config.batch_size, config.write_counters_now)?;
    store.build_or_replace_stats_tables()?;

    println!(
        "inserted {} records ({} skipped as duplicates)",
        report.rows_inserted, report.rows_skipped_duplicate
    );
    Ok(())
}

fn cmd_rebuild(db: Option<&std::path::Path>) -> Result<()> {
    let store = open_store(db, vec![], None)?;
    store.build_or_replace_stats_tables()?;
    println!("stats tables rebuilt");
    Ok(())
}

fn cmd_query(db: Option<&std::path::Path>, record: &str, limit: i64) -> Result<()> {
    let store = open_store(db, vec![], None)?;

    let value: Value = serde_json::from_str(record).context("parsing query record as JSON")?;
    let Some(obj) = value.as_object() else {
        bail!("query record must be a JSON object");
    };

    let mut config = FinderConfig::default();
    config.return_records_limit = limit;

    let result = fuzzylink::find_matches(&store, obj.clone(), &config)?;
    for candidate in &result.ranked {
        println!(
            "{}\tscore={:.4}\tbm25={:.4}",
            candidate.id, candidate.score, candidate.bm25_score
        );
    }
    if result.ranked.is_empty() {
        eprintln!("no matches found");
    }
    Ok(())
}
