use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use siteqa_core::config::Settings;
use siteqa_core::ingest::load_records;
use siteqa_core::types::Answer;
use siteqa_pipeline::{open_index, Models, Orchestrator};

#[derive(Parser)]
#[command(name = "siteqa")]
#[command(about = "Grounded question answering over a website's content")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed chunk records (.json/.jsonl, file or directory) into the index
    Ingest {
        path: PathBuf,
        /// Replace the whole index instead of adding to it
        #[arg(long)]
        rebuild: bool,
    },
    /// Answer one question
    Ask {
        query: String,
        #[arg(long)]
        session: Option<String>,
        /// Print the full answer as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive conversation on a single session
    Chat,
    /// Show the live index snapshot
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load().context("loading configuration")?;
    let orchestrator = Arc::new(open(settings).await?);

    match cli.command {
        Commands::Ingest { path, rebuild } => ingest(&orchestrator, &path, rebuild).await?,
        Commands::Ask { query, session, json } => {
            let answer = orchestrator.answer(&query, session.as_deref()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Commands::Chat => chat(&orchestrator).await?,
        Commands::Status => status(&orchestrator)?,
    }
    Ok(())
}

async fn open(settings: Settings) -> Result<Orchestrator> {
    let models = Models::from_settings(&settings).context("loading models")?;
    let (index, store) = open_index(&settings, models.embedder.id())
        .await
        .with_context(|| format!("opening index under {}", settings.index_dir().display()))?;
    Ok(Orchestrator::new(settings, index, Some(store), models))
}

async fn ingest(orchestrator: &Orchestrator, path: &Path, rebuild: bool) -> Result<()> {
    let records = load_records(path).with_context(|| format!("reading records from {}", path.display()))?;
    if records.is_empty() && !rebuild {
        println!("No records found under {}", path.display());
        return Ok(());
    }

    let bar = ProgressBar::new(records.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks ({eta})")?
            .progress_chars("##-"),
    );
    let tick = |n: usize| bar.inc(n as u64);

    let report = if rebuild {
        orchestrator.rebuild(records, Some(&tick)).await?
    } else {
        orchestrator.ingest(records, Some(&tick)).await?
    };
    bar.finish_and_clear();

    println!("Index v{} live with {} chunks", report.version, report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  reused:   {}", report.reused);
    if report.skipped > 0 {
        println!("  skipped:  {} (no text)", report.skipped);
    }
    Ok(())
}

async fn chat(orchestrator: &Arc<Orchestrator>) -> Result<()> {
    let session = format!("chat-{}", chrono::Utc::now().timestamp_millis());
    let sweeper = orchestrator.spawn_session_sweeper(Duration::from_secs(60));
    info!("Chat session {}", session);
    println!("Ask a question (empty line or Ctrl-D to quit).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else { break };
        if line.trim().is_empty() {
            break;
        }
        let answer = orchestrator.answer(&line, Some(&session)).await;
        print_answer(&answer);
        println!();
    }
    sweeper.abort();
    Ok(())
}

fn status(orchestrator: &Orchestrator) -> Result<()> {
    let settings = orchestrator.settings();
    let index = orchestrator.index();
    let snapshot = index.snapshot()?;
    println!("Index directory: {}", settings.index_dir().display());
    println!("Version:         v{}", snapshot.version());
    println!("Chunks:          {}", snapshot.len());
    println!("Dimension:       {}", snapshot.dim());
    println!("Metric:          {}", snapshot.metric().as_str());
    println!("Embedder:        {}", snapshot.embedder_id());
    if let Some(store) = orchestrator.indexer().store() {
        let versions = store.list_versions()?;
        let listed: Vec<String> = versions.iter().map(|v| format!("v{v}")).collect();
        println!("On disk:         {}", if listed.is_empty() { "none".to_string() } else { listed.join(", ") });
        if let Some(current) = store.current_version()? {
            let manifest = store.read_manifest(current)?;
            println!("Saved at:        {}", manifest.created_at.to_rfc3339());
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.response_text);
    if !answer.cited_chunks.is_empty() {
        println!("\nSources:");
        for (i, cited) in answer.cited_chunks.iter().enumerate() {
            let title = if cited.title.is_empty() { cited.id.as_str() } else { cited.title.as_str() };
            println!("  [{}] {} - {} ({:.2})", i + 1, title, cited.source_url, cited.score);
        }
    }
    let mut flags = Vec::new();
    if !answer.grounded {
        flags.push("ungrounded".to_string());
    }
    if answer.cached {
        flags.push("cached".to_string());
    }
    if answer.rerank_failures > 0 {
        flags.push(format!("{} unscored", answer.rerank_failures));
    }
    if let Some(error) = &answer.error {
        flags.push(format!("{:?}", error.error_kind));
    }
    flags.push(format!("{} ms", answer.latency_ms));
    println!("({})", flags.join(", "));
}
