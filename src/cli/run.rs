//! Resumable per-page recognition of a capture directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use console::style;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use pagescribe::config::Config;
use pagescribe::models::ContentChunk;
use pagescribe::ocr::{BackendManager, RecognitionBackend};
use pagescribe::resilience::ResilientBackend;
use pagescribe::run_state::{RunStateStore, RunStatus};
use pagescribe::workflow::{discover_pages, ChunkSink, PageWorkflow, WorkflowEvent};

use super::helpers::{pick_backend, progress_bar};

/// Appends one JSON chunk per line.
struct JsonLinesSink {
    file: tokio::fs::File,
}

impl JsonLinesSink {
    /// Open `path`, keeping earlier lines only when a run is being resumed.
    async fn open(path: &Path, append: bool) -> std::io::Result<Self> {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        Ok(Self {
            file: options.open(path).await?,
        })
    }
}

#[async_trait]
impl ChunkSink for JsonLinesSink {
    async fn accept(&mut self, chunk: &ContentChunk) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(chunk)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Recognize every page image in `dir`, checkpointing after each page.
pub async fn cmd_run(
    config: &Config,
    dir: &Path,
    job: Option<String>,
    backend: Option<&str>,
    output: Option<PathBuf>,
    prefer_geometry: bool,
) -> anyhow::Result<()> {
    let job_id = match job {
        Some(job) => job,
        None => dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .context("Cannot derive a job id from the directory name; pass --job")?,
    };

    let pages = discover_pages(dir)
        .with_context(|| format!("Failed to list page images in {}", dir.display()))?;
    if pages.is_empty() {
        println!("{} No page images found in {}", style("!").yellow(), dir.display());
        return Ok(());
    }

    let manager = BackendManager::from_settings(&config.ocr);
    let backend = pick_backend(&manager, backend).await?;
    let kind = backend.kind();
    let resilient: Arc<dyn RecognitionBackend> =
        Arc::new(ResilientBackend::from_settings(backend, &config.resilience));

    let store = RunStateStore::new(config.state_dir());
    let resuming = matches!(
        store.load(&job_id),
        Ok(Some(ref state)) if state.status != RunStatus::Completed
    );
    let output = output.unwrap_or_else(|| dir.join(format!("{}.chunks.jsonl", job_id)));
    let mut sink = JsonLinesSink::open(&output, resuming)
        .await
        .with_context(|| format!("Failed to open {}", output.display()))?;

    println!(
        "{} {} pages of {} with {}",
        style("→").cyan(),
        pages.len(),
        style(&job_id).bold(),
        kind
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pb = progress_bar(pages.len() as u64);
    let progress = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    WorkflowEvent::Started {
                        resumed: true,
                        next_page,
                        ..
                    } => {
                        pb.println(format!("  Resuming from page {}", next_page));
                    }
                    WorkflowEvent::Started { .. } => {}
                    WorkflowEvent::PageSkipped { .. } => pb.inc(1),
                    WorkflowEvent::PageRecognized { page, chars, .. } => {
                        pb.inc(1);
                        pb.set_message(format!("page {} ({} chars)", page, chars));
                    }
                    WorkflowEvent::PageFailed { page, error } => {
                        pb.inc(1);
                        pb.println(format!("  {} page {}: {}", style("✗").red(), page, error));
                    }
                    WorkflowEvent::Finished { .. } => pb.finish_and_clear(),
                }
            }
        })
    };

    let workflow = PageWorkflow::new(resilient, store)
        .prefer_geometry(prefer_geometry && config.ocr.prefer_geometry)
        .with_events(tx);
    let outcome = workflow.run(&job_id, pages, &mut sink).await;
    // Closes the event channel
    drop(workflow);
    let _ = progress.await;
    pb.finish_and_clear();

    let summary = outcome?;
    println!(
        "{} {} recognized, {} failed, {} already done",
        style("✓").green(),
        summary.recognized,
        summary.failed,
        summary.skipped
    );
    println!("  Chunks: {}", output.display());
    if summary.failed > 0 {
        println!(
            "  {} failed pages listed in {}",
            style("!").yellow(),
            summary.failure_log.display()
        );
    }
    Ok(())
}
