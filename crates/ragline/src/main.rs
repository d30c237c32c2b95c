//! # ragline CLI
//!
//! ```bash
//! ragline --config ./config/ragline.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragline init` | Create the SQLite database and run schema migrations |
//! | `ragline formats` | List the file extensions that can be ingested |
//! | `ragline ingest <kb> <file>` | Ingest one document and wait for the result |
//! | `ragline remove <kb> <file>` | Delete a document's chunks |
//! | `ragline stats <kb>` | Document and chunk counts of a knowledge base |
//! | `ragline report --request <file>` | Generate a grounded report from a JSON request |
//! | `ragline redact <text>...` | Redact PII from free texts |
//!
//! Logs go to stderr; `RUST_LOG` overrides the default filter.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragline::config::{self, Config};
use ragline::formats::ParserRegistry;
use ragline::models::ReportRequest;
use ragline::service::{self, RagService};
use ragline::{db, migrate};

#[derive(Parser)]
#[command(
    name = "ragline",
    about = "Document ingestion with PII redaction, vector retrieval, and grounded report generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print command results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List supported file extensions.
    Formats,

    /// Ingest a document from the object store.
    ///
    /// The object is read from `<key_prefix>/<knowledge_base_id>/<filename>`
    /// in the configured bucket.
    Ingest {
        knowledge_base_id: String,
        filename: String,
    },

    /// Remove a document and all of its chunks.
    Remove {
        knowledge_base_id: String,
        filename: String,
    },

    /// Show document and chunk counts for a knowledge base.
    Stats { knowledge_base_id: String },

    /// Generate a report.
    Report {
        /// JSON report request; `-` reads standard input.
        #[arg(long)]
        request: PathBuf,
    },

    /// Redact PII from one or more texts with the configured policy.
    ///
    /// With no arguments, each line of standard input is one text.
    Redact { texts: Vec<String> },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "ragline=debug" } else { "ragline=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn read_request(path: &Path) -> Result<ReportRequest> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Failed to parse report request")
}

fn read_texts(texts: Vec<String>) -> Result<Vec<String>> {
    if !texts.is_empty() {
        return Ok(texts);
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read texts from stdin")?;
    Ok(buf.lines().map(str::to_string).collect())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    // Commands that don't require config
    if let Commands::Formats = cli.command {
        let formats = ParserRegistry::with_builtins().supported_extensions();
        if cli.json {
            print_json(&formats)?;
        } else {
            for ext in formats {
                println!("{}", ext);
            }
        }
        return Ok(());
    }

    let cfg: Config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Formats => {}
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool, cfg.embedding.dims, cfg.store.metric).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            knowledge_base_id,
            filename,
        } => {
            let svc = RagService::build(Arc::new(cfg)).await?;
            let job = svc.ingest(&knowledge_base_id, &filename).await?;
            if cli.json {
                print_json(&job)?;
            } else {
                println!(
                    "{} {} ({} chunks, revision {})",
                    job.key, job.state, job.chunk_count, job.revision
                );
            }
        }
        Commands::Remove {
            knowledge_base_id,
            filename,
        } => {
            let store = service::open_store(&cfg).await?;
            let removed = store.remove(&knowledge_base_id, &filename).await?;
            if cli.json {
                print_json(&serde_json::json!({ "removed_chunks": removed }))?;
            } else {
                println!(
                    "Removed {}/{} ({} chunks)",
                    knowledge_base_id, filename, removed
                );
            }
        }
        Commands::Stats { knowledge_base_id } => {
            let store = service::open_store(&cfg).await?;
            let stats = service::knowledge_base_stats(store.as_ref(), &knowledge_base_id).await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("Knowledge base: {}", stats.knowledge_base_id);
                println!("  Documents: {}", stats.total_documents);
                println!("  Chunks:    {}", stats.total_chunks);
                for file in &stats.files {
                    println!("  - {}", file);
                }
            }
        }
        Commands::Report { request } => {
            let request = read_request(&request)?;
            let svc = RagService::build(Arc::new(cfg)).await?;
            let response = svc.generate_report(&request).await?;
            if cli.json {
                print_json(&response)?;
            } else {
                println!("{}", response.message);
                if !response.references.is_empty() {
                    println!();
                    println!("References:");
                    for reference in &response.references {
                        println!("  - {}", reference);
                    }
                }
            }
        }
        Commands::Redact { texts } => {
            let texts = read_texts(texts)?;
            let redactor = service::pii_redactor(&cfg, service::open_detector(&cfg)?);
            let redacted = redactor.redact_texts(&texts).await?;
            if cli.json {
                print_json(&serde_json::json!({
                    "redacted_texts": redacted,
                    "count": redacted.len(),
                }))?;
            } else {
                for text in &redacted {
                    println!("{}", text);
                }
            }
        }
    }

    Ok(())
}
