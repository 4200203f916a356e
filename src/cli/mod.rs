//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod backends;
mod helpers;
mod overlay;
mod recognize;
mod run;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use helpers::load_config;

#[derive(Parser)]
#[command(name = "pagescribe")]
#[command(about = "Resumable OCR and searchable text layers for captured page images")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Show recognition backends, their availability and estimated cost
    Backends {
        /// Page count used for the cost estimate
        #[arg(short, long, default_value = "100")]
        pages: usize,
    },

    /// Recognize a set of images concurrently and write the results as JSON
    Recognize {
        /// Image files to recognize
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Backend to use (native, tesseract, hosted, ollama); defaults to the first available
        #[arg(short, long)]
        backend: Option<String>,
        /// Maximum recognitions in flight (defaults to config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Retries per image (defaults to config)
        #[arg(long)]
        max_retries: Option<u32>,
        /// Abort on the first failed image
        #[arg(long)]
        stop_on_error: bool,
        /// Request word bounding boxes when the backend supports them
        #[arg(long)]
        geometry: bool,
        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recognize a directory of page images page by page, resuming interrupted runs
    Run {
        /// Directory containing one image per page
        dir: PathBuf,
        /// Job id used for checkpoints (defaults to the directory name)
        #[arg(long)]
        job: Option<String>,
        /// Backend to use; defaults to the first available
        #[arg(short, long)]
        backend: Option<String>,
        /// Chunks output file (JSON Lines; defaults to <dir>/<job>.chunks.jsonl)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Recognize plain text only, even if the backend reports word boxes
        #[arg(long)]
        no_geometry: bool,
    },

    /// Add invisible text layers from recognized chunks to a PDF
    Overlay {
        /// PDF with one page per captured image
        pdf: PathBuf,
        /// Chunks file written by `run`
        chunks: PathBuf,
        /// Output PDF (defaults to overwriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the checkpoint of a job
    Status {
        /// Job id
        job: String,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Backends { pages } => backends::cmd_backends(&config, pages).await,
        Commands::Recognize {
            files,
            backend,
            concurrency,
            max_retries,
            stop_on_error,
            geometry,
            output,
        } => {
            recognize::cmd_recognize(
                &config,
                recognize::RecognizeArgs {
                    files,
                    backend,
                    concurrency,
                    max_retries,
                    stop_on_error,
                    geometry,
                    output,
                },
            )
            .await
        }
        Commands::Run {
            dir,
            job,
            backend,
            output,
            no_geometry,
        } => run::cmd_run(&config, &dir, job, backend.as_deref(), output, !no_geometry).await,
        Commands::Overlay {
            pdf,
            chunks,
            output,
        } => overlay::cmd_overlay(&config, &pdf, &chunks, output.as_deref()).await,
        Commands::Status { job } => status::cmd_status(&config, &job).await,
    }
}
