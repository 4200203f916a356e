//! Concurrent batch recognition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;

use pagescribe::batch::{BatchOptions, BatchOrchestrator};
use pagescribe::config::Config;
use pagescribe::ocr::BackendManager;
use pagescribe::resilience::ResilientBackend;

use super::helpers::{pick_backend, progress_bar};

pub struct RecognizeArgs {
    pub files: Vec<PathBuf>,
    pub backend: Option<String>,
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub stop_on_error: bool,
    pub geometry: bool,
    pub output: Option<PathBuf>,
}

/// Recognize every file and emit the batch result as JSON.
pub async fn cmd_recognize(config: &Config, args: RecognizeArgs) -> anyhow::Result<()> {
    let manager = BackendManager::from_settings(&config.ocr);
    let backend = pick_backend(&manager, args.backend.as_deref()).await?;
    let backend = Arc::new(ResilientBackend::from_settings(backend, &config.resilience));

    let mut options = BatchOptions::from(&config.batch);
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency;
    }
    if args.stop_on_error {
        options.continue_on_error = false;
    }
    options.max_retries = args.max_retries;
    options.with_geometry = args.geometry;

    let pb = progress_bar(args.files.len() as u64);
    let on_progress = {
        let pb = pb.clone();
        move |done: usize, _total: usize, path: &Path| {
            pb.set_position(done as u64);
            pb.set_message(path.display().to_string());
        }
    };

    let orchestrator = BatchOrchestrator::new(backend.clone(), options);
    let outcome = orchestrator
        .run_with_progress(&args.files, Some(&on_progress))
        .await;
    pb.finish_and_clear();
    let result = outcome?;

    let json = serde_json::to_string_pretty(&result)?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json).await?;
            eprintln!("{} Wrote {}", style("✓").green(), path.display());
        }
        None => println!("{}", json),
    }

    let stats = backend.stats().await;
    eprintln!(
        "{} {} recognized, {} failed in {:.1}s ({} retries, {:.0}% success, circuit {})",
        style("→").cyan(),
        result.stats.successful,
        result.stats.failed,
        result.stats.total_time.as_secs_f64(),
        stats.retry_attempts,
        stats.success_rate() * 100.0,
        backend.circuit().await.status
    );
    for failure in &result.failures {
        eprintln!(
            "  {} {}: {}",
            style("✗").red(),
            failure.path.display(),
            failure.error
        );
    }
    Ok(())
}
