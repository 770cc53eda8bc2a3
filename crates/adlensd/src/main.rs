//! AdLens daemon entry point.

use adlens_common::config::AdlensConfig;
use adlens_common::models::AnswerChunk;
use adlensd::cache::AnswerCache;
use adlensd::embedding_client::OllamaEmbeddings;
use adlensd::generation_client::OllamaClient;
use adlensd::pipeline::AnswerPipeline;
use adlensd::store::MetricsStore;
use adlensd::summary::SummaryStore;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adlensd", version, about = "Campaign performance assistant daemon")]
struct Cli {
    /// Path to the config file (defaults to /etc/adlens/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the metrics database (defaults to the system data dir)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question for a tenant, streaming to stdout
    Ask {
        #[arg(long)]
        tenant: String,
        question: Vec<String>,
    },
    /// Recompute performance summaries for a tenant
    RefreshSummaries {
        #[arg(long)]
        tenant: String,
    },
    /// Delete expired answer-cache entries
    PurgeCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AdlensConfig::load_from(path),
        None => AdlensConfig::load(),
    };
    let store = match &cli.database {
        Some(path) => MetricsStore::open(path)?,
        None => MetricsStore::open_default()?,
    };

    info!("adlensd v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Ask { tenant, question } => {
            let question = question.join(" ");
            let generation = Arc::new(OllamaClient::new(&config.llm)?);
            let embeddings = Arc::new(OllamaEmbeddings::new(&config.llm, &config.retrieval)?);
            let pipeline = AnswerPipeline::new(&config, store, generation, embeddings);

            let (tx, mut rx) = mpsc::channel(32);
            let printer = tokio::spawn(async move {
                let mut stdout = std::io::stdout();
                while let Some(chunk) = rx.recv().await {
                    match chunk {
                        AnswerChunk::Text(text) => {
                            let _ = write!(stdout, "{}", text);
                            let _ = stdout.flush();
                        }
                        AnswerChunk::Done => {
                            let _ = writeln!(stdout);
                        }
                    }
                }
            });

            let outcome = pipeline.answer(&tenant, &question, &tx).await?;
            drop(tx);
            printer.await?;

            info!(
                "answered (cached: {}, fallback: {}, grounded: {})",
                outcome.from_cache, outcome.fallback_used, outcome.grounded
            );
        }
        Command::RefreshSummaries { tenant } => {
            let summaries = SummaryStore::new(store);
            let written = summaries.refresh_tenant(&tenant)?;
            info!("refreshed {} summary rows for {}", written, tenant);
        }
        Command::PurgeCache => {
            let cache = AnswerCache::new(store, config.cache.ttl_hours);
            let purged = cache.purge_expired()?;
            info!("purged {} expired cache entries", purged);
        }
    }

    Ok(())
}
