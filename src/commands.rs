use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::EmbeddingClient;
use crate::generation::GenerationClient;
use crate::index::{VectorIndex, WriteMode};
use crate::pipeline::{CancelFlag, Orchestrator, SourceDocument};

/// Show the active configuration as TOML
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!(
        "# {}",
        style(config.config_file_path().display()).dim()
    );
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Write the current (default or loaded) configuration to disk so it can be
/// edited by hand
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let path = config.config_file_path();
    if path.exists() {
        bail!("config file already exists at {}", path.display());
    }
    config.save()?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Ingest plain-text files into a collection
#[inline]
pub async fn run_ingest(config: &Config, files: &[PathBuf], collection: &str) -> Result<()> {
    if files.is_empty() {
        bail!("no input files given");
    }

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let id = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", file.display()))?;
        documents.push(SourceDocument { id, text });
    }

    let (orchestrator, embedder) = build_pipeline(config).await?;

    embedder
        .health_check()
        .context("Embedding service is not available")?;

    // Ctrl-C stops between documents; in-flight documents finish cleanly
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Cancellation requested, finishing in-flight documents");
                cancel.cancel();
            }
        });
    }

    let bar = ProgressBar::new_spinner().with_message(format!(
        "Embedding and indexing {} documents into '{}'",
        documents.len(),
        collection
    ));
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    if let Ok(progress_style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(progress_style);
    }

    let report = orchestrator
        .ingest_batch(documents, collection, &cancel)
        .await;
    bar.finish_and_clear();

    for ingest in &report.succeeded {
        println!(
            "{} {} ({} chunks)",
            style("indexed").green(),
            ingest.source,
            ingest.chunks_written
        );
    }
    for (source, error) in &report.failed {
        println!("{} {}: {}", style("failed").red(), source, error);
    }
    if report.cancelled {
        println!("{} {} documents skipped", style("cancelled").yellow(), report.skipped);
    }

    println!(
        "Done: {} succeeded, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );

    if !report.failed.is_empty() {
        bail!("{} documents failed to ingest", report.failed.len());
    }
    Ok(())
}

/// Retrieve and print ranked context for a query, without calling the
/// generation service
#[inline]
pub async fn run_query(
    config: &Config,
    question: &str,
    collection: &str,
    top_k: Option<usize>,
    min_score: Option<f32>,
) -> Result<()> {
    let top_k = top_k.unwrap_or(config.search.top_k);
    let min_score = min_score.unwrap_or(config.search.min_score);

    let (orchestrator, _) = build_pipeline(config).await?;
    let results = orchestrator
        .retrieve(question, collection, top_k, min_score)
        .await?;

    if results.is_empty() {
        println!(
            "No results above score {:.2} in collection '{}'",
            min_score, collection
        );
        return Ok(());
    }

    for result in &results {
        println!(
            "{} {} {}",
            style(format!("#{}", result.rank)).bold(),
            style(format!("{:.3}", result.score)).cyan(),
            style(&result.chunk.id).dim()
        );
        println!("{}\n", result.chunk.text);
    }
    Ok(())
}

/// Answer a question with retrieved context and the generation service
#[inline]
pub async fn run_ask(
    config: &Config,
    question: &str,
    collection: &str,
    top_k: Option<usize>,
    min_score: Option<f32>,
    stream: bool,
) -> Result<()> {
    let top_k = top_k.unwrap_or(config.search.top_k);
    let min_score = min_score.unwrap_or(config.search.min_score);

    let (orchestrator, _) = build_pipeline(config).await?;
    let generator = GenerationClient::new(&config.generation)?;

    if stream {
        let prompt = orchestrator
            .answer_query(question, collection, top_k, min_score)
            .await?;
        info!("Streaming answer with {} context passages", prompt.context.len());

        let fragments = generator.stream(&prompt.to_messages())?;
        let mut stdout = std::io::stdout();
        for fragment in fragments {
            write!(stdout, "{}", fragment?)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
    } else {
        let answer = orchestrator
            .ask(&generator, question, collection, top_k, min_score)
            .await?;
        println!("{}", answer);
    }
    Ok(())
}

/// List collections with record counts
#[inline]
pub async fn list_collections(config: &Config) -> Result<()> {
    let index = open_index(config).await?;
    let infos = index.collections().await;

    if infos.is_empty() {
        println!("No collections yet. Use 'ragnarok ingest <files>' to create one.");
        return Ok(());
    }

    println!("Collections ({} total):", infos.len());
    for info in infos {
        println!("  {} ({} records)", style(info.name).bold(), info.records);
    }
    Ok(())
}

/// Delete a whole collection, or just one source document's records
#[inline]
pub async fn run_delete(
    config: &Config,
    collection: &str,
    source: Option<&str>,
) -> Result<()> {
    let index = open_index(config).await?;

    match source {
        Some(source) => {
            let removed = index
                .delete_source(collection, source, WriteMode::Strict)
                .await?;
            println!(
                "Removed {} records for '{}' from '{}'",
                removed, source, collection
            );
        }
        None => {
            if index.drop_collection(collection).await? {
                println!("Dropped collection '{}'", collection);
            } else {
                bail!("collection '{}' does not exist", collection);
            }
        }
    }
    Ok(())
}

async fn open_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let index = VectorIndex::open(config.index_path(), config.embedding.dimension).await?;
    Ok(Arc::new(index))
}

async fn build_pipeline(config: &Config) -> Result<(Orchestrator, Arc<EmbeddingClient>)> {
    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let index = open_index(config).await?;

    let orchestrator = Orchestrator::new(Arc::clone(&embedder), index, config.chunking)
        .with_embed_concurrency(config.embedding.concurrency);

    Ok((orchestrator, embedder))
}
