use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use miner_service::{
    CancelToken, Granularity, MinerConfig, MinerService, RawDocument, TrendQuery,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "miner-cli", about = "Ingest, search, and analyze a web text corpus")]
struct Cli {
    /// Config file; defaults merge with MINER_* environment variables.
    #[arg(long, default_value = "miner.toml")]
    config: String,

    /// Override the database path from the config.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest documents from a JSONL file (one document per line).
    Ingest {
        #[arg(long)]
        input: PathBuf,
    },
    /// Hybrid search over the corpus.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Use vector similarity only, skipping keyword fusion.
        #[arg(long)]
        no_hybrid: bool,
    },
    /// Publication trend series with a least-squares fit.
    Trends {
        /// Restrict to documents carrying this tag.
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "year")]
        granularity: String,
    },
    /// Tag co-occurrence counts with monthly correlation.
    Cooccur {
        #[arg(long, default_value_t = 2)]
        min_count: u64,
    },
    /// Corpus-level counters.
    Stats,
    /// Delete all stored chunks.
    Reset {
        /// Required; reset refuses to run without it.
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = MinerConfig::load_from(&cli.config).context("loading configuration")?;
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }
    let svc = MinerService::from_config(cfg).context("starting service")?;

    match cli.command {
        Command::Ingest { input } => {
            let docs = read_jsonl(&input)
                .with_context(|| format!("reading documents from {}", input.display()))?;
            info!(count = docs.len(), "ingesting documents");
            let report = svc.ingest(docs, Some(CancelToken::new()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search { query, limit, no_hybrid } => {
            let hits = svc.search(&query, limit, !no_hybrid)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Command::Trends { tag, from, to, granularity } => {
            let query = TrendQuery {
                tag,
                from,
                to,
                granularity: granularity.parse::<Granularity>()?,
            };
            let report = svc.trends(&query)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cooccur { min_count } => {
            let pairs = svc.cooccurrence(min_count)?;
            println!("{}", serde_json::to_string_pretty(&pairs)?);
        }
        Command::Stats => {
            let stats = svc.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Reset { yes } => {
            anyhow::ensure!(yes, "refusing to reset without --yes");
            let removed = svc.reset()?;
            println!("removed {removed} chunks");
        }
    }
    Ok(())
}

fn read_jsonl(path: &PathBuf) -> Result<Vec<RawDocument>> {
    let file = File::open(path)?;
    let mut docs = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: RawDocument = serde_json::from_str(&line)
            .with_context(|| format!("line {}: malformed document", lineno + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}
