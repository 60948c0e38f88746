//! # Chunkforge CLI (`forge`)
//!
//! The `forge` binary drives the re-chunking engine from the command line:
//! database initialization, document ingestion, session inspection, commit
//! jobs, search, and the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! forge --config ./config/forge.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `forge init` | Create the SQLite database and run schema migrations |
//! | `forge ingest <file>` | Extract a PDF or text file into a new session |
//! | `forge sessions` | List sessions with doc id and version |
//! | `forge show <session-id>` | Print one session's pages, spans, and chunks |
//! | `forge commit <session-id>` | Embed and index a session's chunks |
//! | `forge job <job-id>` | Show a commit job's status |
//! | `forge search "<query>"` | Search committed chunk records |
//! | `forge serve` | Start the HTTP API server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chunkforge::config::{load_config, Config};
use chunkforge::extract::{content_type_for_path, extract_pages};
use chunkforge::index_store::{IndexStore, SqliteIndexStore};
use chunkforge::jobs::{run_commit_job, JobRecord};
use chunkforge::session::create_session;
use chunkforge::{db, migrate, store};

/// Chunkforge — a marker-preserving document re-chunking and indexing
/// engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/forge.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "forge",
    about = "Chunkforge — a marker-preserving document re-chunking and indexing engine",
    version,
    long_about = "Chunkforge ingests documents into editable, page-marked sessions, derives \
    chunk spans under a configurable strategy, and commits content-addressed records into \
    per-embedding-model search indices."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/forge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (sessions,
    /// jobs, indices, index_records). Idempotent.
    Init,

    /// Extract a document into a new session.
    ///
    /// PDF and plain-text files are supported. Prints the new session id,
    /// page count, and chunk count.
    Ingest {
        /// Path to the source file.
        file: PathBuf,

        /// Document id; defaults to the file name.
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// List all sessions.
    Sessions,

    /// Print one session's state: pages, strategy, spans, and chunks.
    Show {
        /// Session id.
        session_id: String,

        /// Also print the full marked text.
        #[arg(long)]
        text: bool,
    },

    /// Embed a session's chunks and write them to the per-model index.
    ///
    /// Runs the commit job in the foreground and prints its terminal
    /// status. Requires an embedding provider to be configured.
    Commit {
        /// Session id.
        session_id: String,

        /// Embedding model name (e.g. text-embedding-3-small).
        #[arg(long)]
        model: String,

        /// Explicit index name; defaults to `{base_index}__{model_key}`.
        #[arg(long)]
        index: Option<String>,
    },

    /// Show a commit job's status.
    Job {
        /// Job id.
        job_id: String,
    },

    /// Search committed chunk records.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `text`, `vector`, or `hybrid`.
        #[arg(long, default_value = "text")]
        mode: String,

        /// Embedding model whose index to search.
        #[arg(long)]
        model: Option<String>,

        /// Explicit index name (overrides --model resolution).
        #[arg(long)]
        index: Option<String>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chunkforge=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Ingest { file, doc_id } => cmd_ingest(&config, &file, doc_id).await,
        Commands::Sessions => cmd_sessions(&config).await,
        Commands::Show { session_id, text } => cmd_show(&config, &session_id, text).await,
        Commands::Commit {
            session_id,
            model,
            index,
        } => cmd_commit(&config, &session_id, model, index).await,
        Commands::Job { job_id } => cmd_job(&config, &job_id).await,
        Commands::Search {
            query,
            mode,
            model,
            index,
            top_k,
        } => cmd_search(&config, &query, &mode, model, index, top_k).await,
        Commands::Serve => chunkforge::server::run_server(&config).await,
    }
}

async fn cmd_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

async fn cmd_ingest(config: &Config, file: &PathBuf, doc_id: Option<String>) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let content_type = content_type_for_path(file);
    let (pages, meta) = extract_pages(&bytes, content_type)?;

    let doc_id = doc_id.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    });

    let strategy = config.chunking.to_strategy()?;
    let session = create_session(doc_id, pages, meta, strategy)?;

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    store::insert_session(&pool, &session).await?;
    pool.close().await;

    println!("ingest {}", file.display());
    println!("  session: {}", session.session_id);
    println!("  doc_id: {}", session.doc_id);
    println!("  pages: {}", session.base_pages.len());
    println!("  chunks: {}", session.chunk_spans.len());
    for warning in &session.extract_meta.warnings {
        println!("  warning: {}", warning);
    }
    println!("ok");
    Ok(())
}

async fn cmd_sessions(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let sessions = store::list_sessions(&pool).await?;
    pool.close().await;

    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for (session_id, doc_id, version) in sessions {
        println!("{}  v{}  {}", session_id, version, doc_id);
    }
    Ok(())
}

async fn cmd_show(config: &Config, session_id: &str, with_text: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let session = store::load_session(&pool, session_id).await?;
    pool.close().await;

    println!("Session {}", session.session_id);
    println!("  doc_id: {}", session.doc_id);
    println!("  version: {}", session.version);
    println!(
        "  extractor: {} {}",
        session.extract_meta.extractor_name, session.extract_meta.extractor_version
    );
    println!(
        "  strategy: {} size={} overlap={} normalize={}",
        session.chunk_strategy.split_mode,
        session.chunk_strategy.chunk_size,
        session.chunk_strategy.overlap,
        session.chunk_strategy.normalize
    );
    println!("  pages:");
    for span in &session.page_spans {
        println!(
            "    page {:>3}  [{}..{})  {} chars",
            span.page_no, span.start, span.end, span.char_len
        );
    }
    println!("  chunks:");
    for chunk in &session.chunk_spans {
        let warn = if chunk.warnings.is_empty() {
            String::new()
        } else {
            format!("  ({})", chunk.warnings.join(", "))
        };
        println!(
            "    {}  [{}..{})  {} chars{}",
            chunk.chunk_id, chunk.start, chunk.end, chunk.char_len, warn
        );
    }
    if with_text {
        println!("---");
        println!("{}", session.current_text);
    }
    Ok(())
}

async fn cmd_commit(
    config: &Config,
    session_id: &str,
    model: String,
    index: Option<String>,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    // Verify the session exists before queueing.
    store::load_session(&pool, session_id).await?;

    let job = JobRecord::new(session_id, model, index);
    store::save_job(&pool, &job).await?;
    println!("commit {}", session_id);
    println!("  job: {}", job.job_id);

    let index_store = std::sync::Arc::new(SqliteIndexStore::new(pool.clone()));
    let finished = run_commit_job(pool.clone(), config.clone(), index_store, job).await;

    println!("  status: {}", finished.status);
    println!(
        "  succeeded: {}/{}  failed: {}",
        finished.succeeded, finished.total, finished.failed
    );
    for sample in &finished.error_samples {
        match &sample.chunk_id {
            Some(chunk_id) => println!("  error [{}]: {}", chunk_id, sample.message),
            None => println!("  error: {}", sample.message),
        }
    }
    pool.close().await;

    if finished.failed > 0 || finished.error.is_some() {
        anyhow::bail!("commit finished with failures");
    }
    println!("ok");
    Ok(())
}

async fn cmd_job(config: &Config, job_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let job = store::load_job(&pool, job_id).await?;
    pool.close().await;

    println!("Job {}", job.job_id);
    println!("  session: {}", job.session_id);
    println!("  model: {}", job.embedding_model);
    println!("  status: {}", job.status);
    println!("  progress: {:.0}%", job.progress * 100.0);
    println!(
        "  succeeded: {}/{}  failed: {}",
        job.succeeded, job.total, job.failed
    );
    if let Some(error) = &job.error {
        println!("  error: {}", error);
    }
    Ok(())
}

async fn cmd_search(
    config: &Config,
    query: &str,
    mode: &str,
    model: Option<String>,
    index: Option<String>,
    top_k: usize,
) -> Result<()> {
    let index_name = match (index, &model) {
        (Some(name), _) => name,
        (None, Some(model)) => {
            chunkforge::index_router::resolve_index_name(&config.index.base_index, model)
        }
        (None, None) => anyhow::bail!("either --index or --model is required"),
    };

    let pool = db::connect(config).await?;
    let index_store = SqliteIndexStore::new(pool.clone());

    let hits = match mode {
        "text" => index_store.search_text(&index_name, query, top_k).await?,
        "vector" | "hybrid" => {
            let provider = chunkforge::embedding::create_provider(&config.embedding)?;
            let vector =
                chunkforge::embedding::embed_query(provider.as_ref(), &config.embedding, query)
                    .await?;
            if mode == "vector" {
                index_store.search_vector(&index_name, &vector, top_k).await?
            } else {
                let text_hits = index_store.search_text(&index_name, query, top_k).await?;
                let vector_hits = index_store
                    .search_vector(&index_name, &vector, top_k)
                    .await?;
                chunkforge::index_store::merge_hybrid(
                    text_hits,
                    vector_hits,
                    config.index.hybrid_alpha,
                    top_k,
                )
            }
        }
        other => anyhow::bail!("Unknown search mode: '{}'. Must be text, vector, or hybrid.", other),
    };
    pool.close().await;

    if hits.is_empty() {
        println!("No results");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let snippet: String = hit.record.text.chars().take(200).collect();
        println!(
            "{:>2}. [{:.3}] {} {} p{}",
            rank + 1,
            hit.score,
            hit.record.doc_id,
            hit.record.chunk_id,
            hit.record.page_no
        );
        println!("    {}", snippet.replace('\n', " "));
    }
    Ok(())
}
