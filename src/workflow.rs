//! Per-page driver: resume, recognize, checkpoint, export.
//!
//! Pages are handled one at a time in page order. A page whose recognition
//! fails still produces a chunk with empty text; the failure is logged and
//! appended to the job's failure log so it can be reprocessed later. The run
//! state is persisted after every page, before the chunk is handed to the
//! sink, so resume information stays accurate even when export fails.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::batch::BatchResult;
use crate::models::{ContentChunk, PageImage};
use crate::ocr::{OcrError, RecognitionBackend};
use crate::run_state::{RunState, RunStateError, RunStateStore};

/// Image extensions picked up from a capture directory.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "webp", "bmp"];

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    RunState(#[from] RunStateError),

    #[error("Failed to export page {page}: {message}")]
    Export { page: u32, message: String },

    #[error("Failed to write failure log: {0}")]
    FailureLog(#[from] std::io::Error),
}

/// Events emitted while a job runs.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Started {
        job_id: String,
        resumed: bool,
        next_page: u32,
        total_pages: usize,
    },
    PageSkipped {
        page: u32,
    },
    PageRecognized {
        page: u32,
        chars: usize,
        geometric: bool,
    },
    PageFailed {
        page: u32,
        error: String,
    },
    Finished {
        recognized: u32,
        failed: u32,
    },
}

/// Receives finished pages (the document assembler side).
#[async_trait]
pub trait ChunkSink: Send {
    async fn accept(&mut self, chunk: &ContentChunk) -> anyhow::Result<()>;
}

#[async_trait]
impl ChunkSink for Vec<ContentChunk> {
    async fn accept(&mut self, chunk: &ContentChunk) -> anyhow::Result<()> {
        self.push(chunk.clone());
        Ok(())
    }
}

/// Outcome of one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowSummary {
    pub state: RunState,
    pub resumed: bool,
    /// Pages skipped because an earlier run completed them.
    pub skipped: u32,
    pub recognized: u32,
    pub failed: u32,
    pub failure_log: PathBuf,
}

/// Drives recognition page by page with checkpointing.
pub struct PageWorkflow {
    backend: Arc<dyn RecognitionBackend>,
    store: RunStateStore,
    prefer_geometry: bool,
    events: Option<mpsc::UnboundedSender<WorkflowEvent>>,
}

impl PageWorkflow {
    pub fn new(backend: Arc<dyn RecognitionBackend>, store: RunStateStore) -> Self {
        Self {
            backend,
            store,
            prefer_geometry: true,
            events: None,
        }
    }

    /// Request word geometry from backends that support it.
    pub fn prefer_geometry(mut self, prefer: bool) -> Self {
        self.prefer_geometry = prefer;
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn store(&self) -> &RunStateStore {
        &self.store
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Process `pages` for `job_id`, resuming from persisted state.
    pub async fn run<S: ChunkSink>(
        &self,
        job_id: &str,
        mut pages: Vec<PageImage>,
        sink: &mut S,
    ) -> Result<WorkflowSummary, WorkflowError> {
        pages.sort_by_key(|p| p.page);
        let total_pages = pages.last().map(|p| p.page);
        let (mut state, resumed) = self.store.begin(job_id, total_pages)?;
        let failure_log = self.store.failure_log_path(job_id)?;
        if !resumed {
            // Entries from an earlier, finished run no longer apply
            match std::fs::remove_file(&failure_log) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(self.abort(&mut state, e.into()));
                }
                _ => {}
            }
        }

        self.emit(WorkflowEvent::Started {
            job_id: job_id.to_string(),
            resumed,
            next_page: state.next_page(),
            total_pages: pages.len(),
        });

        let mut summary = WorkflowSummary {
            state: state.clone(),
            resumed,
            skipped: 0,
            recognized: 0,
            failed: 0,
            failure_log: failure_log.clone(),
        };

        for page in &pages {
            if state.is_done(page.page) {
                summary.skipped += 1;
                self.emit(WorkflowEvent::PageSkipped { page: page.page });
                continue;
            }

            let (chunk, recognized) = match self.recognize_page(page).await {
                Ok(chunk) => {
                    self.emit(WorkflowEvent::PageRecognized {
                        page: page.page,
                        chars: chunk.text.len(),
                        geometric: chunk.has_geometry(),
                    });
                    (chunk, true)
                }
                Err(err) => {
                    warn!("Recognition failed for page {}: {}", page.page, err);
                    if let Err(log_err) = append_failure(&failure_log, page.path(), &err) {
                        return Err(self.abort(&mut state, log_err.into()));
                    }
                    self.emit(WorkflowEvent::PageFailed {
                        page: page.page,
                        error: err.to_string(),
                    });
                    (ContentChunk::empty(page), false)
                }
            };

            if recognized {
                summary.recognized += 1;
            } else {
                summary.failed += 1;
            }

            state.record_page(page.page, recognized)?;
            self.store.save(&state)?;
            debug!("Checkpointed {} at page {}", job_id, state.last_page);

            if let Err(e) = sink.accept(&chunk).await {
                return Err(self.abort(
                    &mut state,
                    WorkflowError::Export {
                        page: page.page,
                        message: format!("{:#}", e),
                    },
                ));
            }
        }

        state.complete()?;
        self.store.save(&state)?;
        info!(
            "Finished {}: {} recognized, {} failed, {} skipped",
            job_id, summary.recognized, summary.failed, summary.skipped
        );
        self.emit(WorkflowEvent::Finished {
            recognized: summary.recognized,
            failed: summary.failed,
        });

        summary.state = state;
        Ok(summary)
    }

    /// Recognize one page into a chunk.
    pub async fn recognize_page(&self, page: &PageImage) -> Result<ContentChunk, OcrError> {
        let with_geometry = self.prefer_geometry && self.backend.capabilities().supports_geometry;
        if with_geometry {
            let result = self.backend.recognize_with_geometry(page.path()).await?;
            Ok(match result.words {
                Some(words) => ContentChunk::from_words(page, words),
                None => ContentChunk::from_text(page, result.text),
            })
        } else {
            let result = self.backend.recognize(page.path()).await?;
            Ok(ContentChunk::from_text(page, result.text))
        }
    }

    /// Mark the run failed (best effort) and hand back the error.
    fn abort(&self, state: &mut RunState, err: WorkflowError) -> WorkflowError {
        warn!("Stopping {}: {}", state.job_id, err);
        if state.fail(err.to_string()).is_ok() {
            if let Err(e) = self.store.save(state) {
                warn!("Failed to persist failed run state: {}", e);
            }
        }
        err
    }
}

/// Append `path<TAB>reason` to the failure log.
fn append_failure(log: &Path, image: &Path, err: &OcrError) -> std::io::Result<()> {
    if let Some(parent) = log.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let reason = err
        .to_string()
        .replace(['\t', '\n', '\r'], " ");
    let mut file = OpenOptions::new().create(true).append(true).open(log)?;
    writeln!(file, "{}\t{}", image.display(), reason)
}

/// Read a failure log back as `(path, reason)` pairs.
pub fn read_failure_log(log: &Path) -> std::io::Result<Vec<(PathBuf, String)>> {
    let contents = match std::fs::read_to_string(log) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(contents
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(path, reason)| (PathBuf::from(path), reason.to_string()))
        .collect())
}

/// Rebuild page-ordered chunks from a batch pass over `pages`.
///
/// Pages without a batch result get empty text.
pub fn chunks_from_batch(pages: &[PageImage], batch: &BatchResult) -> Vec<ContentChunk> {
    let by_path: HashMap<&Path, _> = batch
        .results
        .iter()
        .map(|item| (item.path.as_path(), item))
        .collect();

    let mut ordered: Vec<&PageImage> = pages.iter().collect();
    ordered.sort_by_key(|p| (p.page, p.index));

    ordered
        .into_iter()
        .map(|page| match by_path.get(page.path()) {
            Some(item) => match &item.words {
                Some(words) if !words.is_empty() => ContentChunk::from_words(page, words.clone()),
                _ => ContentChunk::from_text(page, item.text.clone()),
            },
            None => ContentChunk::empty(page),
        })
        .collect()
}

/// Page images in a capture directory, ordered by file name and numbered from 1.
pub fn discover_pages(dir: &Path) -> std::io::Result<Vec<PageImage>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(index, path)| PageImage::new(path, index as u32 + 1, index))
        .collect())
}

/// Sort key that orders `page-2` before `page-10`.
fn natural_key(path: &Path) -> (u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let number = name
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .last()
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX);
    (number, name)
}
