//! Thin CLI driver for the assistant core.
//!
//! Loads configuration and corpus source files, answers one question, and
//! prints the answer with its citations. The heavy lifting all lives in the
//! library; this binary is just the canonical caller.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use miqat::{KnowledgeStore, MiqatConfig, RagEngine, SourceSet};

#[derive(Parser)]
#[command(name = "miqat", version, about = "Pilgrimage travel assistant (RAG core)")]
struct Cli {
    /// The question to ask.
    #[arg(required_unless_present = "show_corpus")]
    question: Vec<String>,

    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "miqat.toml")]
    config: PathBuf,

    /// Directory of JSON corpus source files.
    #[arg(short, long, default_value = "data")]
    data: PathBuf,

    /// Session id; a fresh one is generated when omitted.
    #[arg(short, long)]
    session: Option<String>,

    /// Print corpus statistics instead of asking a question.
    #[arg(long)]
    show_corpus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("miqat=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = MiqatConfig::from_toml_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let knowledge = Arc::new(KnowledgeStore::new());
    let sets = SourceSet::from_json_dir(&cli.data)
        .with_context(|| format!("reading corpus sources from {}", cli.data.display()))?;
    let snapshot = knowledge.load(&sets).context("loading corpus")?;

    if cli.show_corpus {
        println!("{}", "Corpus".bold());
        println!("  entries: {}", snapshot.len());
        let mut counts: Vec<_> = snapshot.category_counts().into_iter().collect();
        counts.sort_by_key(|(category, _)| category.to_string());
        for (category, count) in counts {
            println!("  {}: {}", category, count);
        }
        return Ok(());
    }

    let engine = RagEngine::new(
        knowledge,
        Arc::new(config.build_gateway()?),
        Arc::new(config.build_session_store()?),
        config.engine_options()?,
    )
    .with_retriever(config.build_retriever());

    let session_id = cli
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let question = cli.question.join(" ");

    match engine.ask(&session_id, &question).await {
        Ok(outcome) => {
            println!("{}", outcome.answer_text.green());
            if !outcome.cited_entry_ids.is_empty() {
                println!(
                    "{} {}",
                    "sources:".dimmed(),
                    outcome.cited_entry_ids.join(", ").dimmed()
                );
            }
            println!(
                "{} {}  {} {}",
                "backend:".dimmed(),
                outcome.backend_used.dimmed(),
                "session:".dimmed(),
                session_id.dimmed()
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            std::process::exit(1);
        }
    }
}
