//! # Docsift CLI (`docsift`)
//!
//! The `docsift` binary drives the whole pipeline: database initialization,
//! document ingestion, semantic search with optional reranking, corpus
//! reindexing, and the offline reranking evaluation harness.
//!
//! ## Usage
//!
//! ```bash
//! docsift --config ./config/docsift.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsift init` | Create the SQLite database and run schema migrations |
//! | `docsift ingest <file>` | Extract, chunk, embed, and index a PDF or DOCX |
//! | `docsift search "<query>"` | Semantic search with sentence-aligned excerpts |
//! | `docsift delete <id>` | Remove a document and its chunks |
//! | `docsift reindex` | Re-embed every chunk into the vector index |
//! | `docsift stats` | Corpus counts and database size |
//! | `docsift eval` | Offline A/B comparison of reranking strategies |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use docsift::config;
use docsift::context::AppContext;
use docsift::db;
use docsift::eval::{self, EvalOptions};
use docsift::ingest;
use docsift::migrate;
use docsift::reindex;
use docsift::retriever::SearchQuery;
use docsift::stats;
use docsift::store;

/// Docsift: semantic search over uploaded documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsift.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsift",
    about = "Semantic search over uploaded PDF and DOCX documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsift.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// chunks, search_events). Idempotent.
    Init,

    /// Ingest a document: extract text, chunk, embed, and index it.
    Ingest {
        /// Path to the PDF or DOCX file.
        file: PathBuf,

        /// Document title. Defaults to the file name.
        #[arg(long)]
        title: Option<String>,

        /// Recorded as the uploader in document metadata.
        #[arg(long)]
        user: Option<String>,
    },

    /// Search the corpus.
    ///
    /// The query is either a text argument or, with `--file`, the extracted
    /// text of an uploaded document.
    Search {
        /// The query text. Omit when using `--file`.
        query: Option<String>,

        /// Use this file's extracted text as the query.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Drop hits below this similarity percent (0-100). Malformed values
        /// are ignored.
        #[arg(long)]
        min_similarity: Option<String>,

        /// Rerank results with the configured strategy.
        #[arg(long)]
        rerank: bool,

        /// Recorded in the search audit log.
        #[arg(long)]
        user: Option<String>,

        /// Print results as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Delete a document and its chunks.
    ///
    /// Vectors stay in the index and are filtered out at read time; run
    /// `reindex` to reclaim them.
    Delete {
        /// Document UUID.
        id: String,
    },

    /// Re-embed every chunk and insert fresh vectors into the index.
    ///
    /// Use after switching embedding models. The collection is never dropped.
    Reindex {
        /// Texts per embedding request.
        #[arg(long, default_value_t = reindex::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Show corpus counts and database size.
    Stats,

    /// Compare reranking strategies on a labeled dataset.
    ///
    /// Reads `{query, positive, negative}` jsonl rows, scores both candidates
    /// under each variant, and writes per-row results plus an aggregate
    /// summary with pairwise sign-test p-values.
    Eval {
        /// Labeled rows, one JSON object per line.
        #[arg(long)]
        data: PathBuf,

        /// Variants file: `{"variants": [{"id", "type", "endpoint"?, "alpha"?}]}`.
        #[arg(long)]
        variants: PathBuf,

        /// Per-row results path; the summary lands next to it.
        #[arg(long, default_value = "./eval/results.jsonl")]
        out: PathBuf,

        /// Maximum rows to evaluate.
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// RNG seed for the candidate shuffle.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Present candidates in dataset order instead of shuffling.
        #[arg(long)]
        no_shuffle: bool,
    },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // Eval runs entirely offline, without database or config.
    let command = match cli.command {
        Commands::Eval {
            data,
            variants,
            out,
            limit,
            seed,
            no_shuffle,
        } => {
            let opts = EvalOptions {
                data,
                variants,
                out,
                limit,
                seed,
                shuffle_candidates: !no_shuffle,
                scorer_timeout: Duration::from_secs(30),
            };
            return eval::run_eval(&opts).await;
        }
        other => other,
    };

    let cfg = config::load_config(&cli.config)?;

    match command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file, title, user } => {
            let pool = db::connect(&cfg).await?;
            let ctx = AppContext::from_config(cfg)?;

            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .with_context(|| format!("Invalid file path: {}", file.display()))?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let title = title.unwrap_or_else(|| filename.clone());

            let doc = ingest::ingest_document(&ctx, &pool, &title, &filename, &bytes, user).await?;
            println!("Ingested document {} ({})", doc.id, doc.title);
        }
        Commands::Search {
            query,
            file,
            min_similarity,
            rerank,
            user,
            json,
        } => {
            if query.is_none() && file.is_none() {
                bail!("Provide a query string or --file");
            }
            let pool = db::connect(&cfg).await?;
            let ctx = AppContext::from_config(cfg)?;
            let retriever = ctx.retriever()?;

            let file = match file {
                Some(path) => {
                    let filename = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(str::to_string)
                        .with_context(|| format!("Invalid file path: {}", path.display()))?;
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    Some((filename, bytes))
                }
                None => None,
            };

            let (query_text, results) = retriever
                .search(
                    &pool,
                    SearchQuery {
                        text: query,
                        file,
                        user_id: user,
                        min_similarity_percent: min_similarity,
                        rerank,
                    },
                )
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results for \"{query_text}\".");
            } else {
                println!("Results for \"{query_text}\":\n");
                for (i, item) in results.iter().enumerate() {
                    let page = item
                        .page_number
                        .map(|p| format!(", page {p}"))
                        .unwrap_or_default();
                    let rerank = item
                        .rerank_score
                        .map(|s| format!(", rerank {s:.4}"))
                        .unwrap_or_default();
                    println!(
                        "{}. {} (score {:.4}{rerank}{page})",
                        i + 1,
                        item.title,
                        item.score
                    );
                    println!("   {}\n", item.excerpt);
                }
            }
        }
        Commands::Delete { id } => {
            let pool = db::connect(&cfg).await?;
            if store::delete_document(&pool, &id).await? {
                println!("Deleted document {id}.");
            } else {
                println!("No document with id {id}.");
            }
        }
        Commands::Reindex { batch_size } => {
            let pool = db::connect(&cfg).await?;
            let ctx = AppContext::from_config(cfg)?;
            let count = reindex::run_reindex(&ctx, &pool, batch_size).await?;
            println!("Reindexed {count} chunks.");
        }
        Commands::Stats => {
            let pool = db::connect(&cfg).await?;
            stats::run_stats(&pool, &cfg.db.path).await?;
        }
        Commands::Eval { .. } => unreachable!(),
    }

    Ok(())
}
