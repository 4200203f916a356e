//! Resumable job progress.
//!
//! One JSON document per job id in the state directory, rewritten atomically
//! after every completed page. A job found IN_PROGRESS or FAILED on startup is
//! resumed from `last_page`; a COMPLETED one starts over. Unreadable state is
//! logged and treated as absent.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunStateError {
    #[error("Run state at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Invalid job id '{0}'")]
    InvalidJobId(String),

    #[error("Run '{job_id}' already finished as {status}")]
    AlreadyFinished { job_id: String, status: RunStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode run state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        })
    }
}

/// Progress of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub job_id: String,
    pub status: RunStatus,
    /// Highest fully completed page. Never decreases.
    pub last_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    pub exported_pages: u32,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Pages whose recognition failed.
    #[serde(default)]
    pub failure_count: u32,
}

impl RunState {
    pub fn new(job_id: impl Into<String>, total_pages: Option<u32>) -> Self {
        Self {
            job_id: job_id.into(),
            status: RunStatus::InProgress,
            last_page: 0,
            total_pages,
            exported_pages: 0,
            start_time: Utc::now(),
            end_time: None,
            stop_reason: None,
            failure_count: 0,
        }
    }

    /// First page that still needs processing.
    pub fn next_page(&self) -> u32 {
        self.last_page + 1
    }

    /// Whether `page` was completed by this or an earlier attempt.
    pub fn is_done(&self, page: u32) -> bool {
        page <= self.last_page
    }

    /// Record a fully processed page.
    pub fn record_page(&mut self, page: u32, recognized: bool) -> Result<(), RunStateError> {
        self.ensure_open()?;
        self.last_page = self.last_page.max(page);
        self.exported_pages += 1;
        if !recognized {
            self.failure_count += 1;
        }
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), RunStateError> {
        self.ensure_open()?;
        self.status = RunStatus::Completed;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), RunStateError> {
        self.ensure_open()?;
        self.status = RunStatus::Failed;
        self.end_time = Some(Utc::now());
        self.stop_reason = Some(reason.into());
        Ok(())
    }

    /// Reopen an interrupted or failed run. Counters are kept.
    fn reopen(&mut self, total_pages: Option<u32>) {
        self.status = RunStatus::InProgress;
        self.end_time = None;
        self.stop_reason = None;
        if total_pages.is_some() {
            self.total_pages = total_pages;
        }
    }

    fn ensure_open(&self) -> Result<(), RunStateError> {
        if self.status.is_terminal() {
            return Err(RunStateError::AlreadyFinished {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }
}

/// JSON file store keyed by job id.
#[derive(Debug, Clone)]
pub struct RunStateStore {
    dir: PathBuf,
}

impl RunStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, job_id: &str) -> Result<PathBuf, RunStateError> {
        validate_job_id(job_id)?;
        Ok(self.dir.join(format!("{}.json", job_id)))
    }

    /// Where per-page failures for a job are listed.
    pub fn failure_log_path(&self, job_id: &str) -> Result<PathBuf, RunStateError> {
        validate_job_id(job_id)?;
        Ok(self.dir.join(format!("{}.failures.tsv", job_id)))
    }

    /// Read persisted state, if any.
    pub fn load(&self, job_id: &str) -> Result<Option<RunState>, RunStateError> {
        let path = self.state_path(job_id)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| RunStateError::Corrupt {
                path,
                message: e.to_string(),
            })
    }

    /// Overwrite the persisted state atomically.
    pub fn save(&self, state: &RunState) -> Result<(), RunStateError> {
        let path = self.state_path(&state.job_id)?;
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_vec_pretty(state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Load a resumable run or create a fresh one, and persist it.
    ///
    /// Returns the state and whether it was resumed.
    pub fn begin(
        &self,
        job_id: &str,
        total_pages: Option<u32>,
    ) -> Result<(RunState, bool), RunStateError> {
        let (state, resumed) = match self.load(job_id) {
            Ok(Some(mut state)) if state.status != RunStatus::Completed => {
                info!(
                    "Resuming {} from page {} (previous status {})",
                    job_id,
                    state.next_page(),
                    state.status
                );
                state.reopen(total_pages);
                (state, true)
            }
            Ok(Some(_)) => {
                info!("Previous run of {} completed, starting fresh", job_id);
                (RunState::new(job_id, total_pages), false)
            }
            Ok(None) => (RunState::new(job_id, total_pages), false),
            Err(e @ RunStateError::Corrupt { .. }) => {
                warn!("{}; starting from the first page", e);
                (RunState::new(job_id, total_pages), false)
            }
            Err(e) => return Err(e),
        };
        self.save(&state)?;
        Ok((state, resumed))
    }
}

/// Job ids become file names.
fn validate_job_id(job_id: &str) -> Result<(), RunStateError> {
    let ok = !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && !job_id.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(RunStateError::InvalidJobId(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_page_is_monotonic() {
        let mut state = RunState::new("book", Some(10));
        state.record_page(3, true).unwrap();
        state.record_page(2, true).unwrap();
        assert_eq!(state.last_page, 3);
        assert_eq!(state.exported_pages, 2);
        assert!(state.is_done(2));
        assert_eq!(state.next_page(), 4);
    }

    #[test]
    fn test_terminal_states_reject_updates() {
        let mut state = RunState::new("book", None);
        state.complete().unwrap();
        assert!(state.end_time.is_some());
        assert!(matches!(
            state.record_page(1, true),
            Err(RunStateError::AlreadyFinished { .. })
        ));
        assert!(state.fail("late").is_err());
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[test]
    fn test_save_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());

        let (mut state, resumed) = store.begin("book", Some(20)).unwrap();
        assert!(!resumed);
        for page in 1..=7 {
            state.record_page(page, page != 4).unwrap();
            store.save(&state).unwrap();
        }

        let (state, resumed) = store.begin("book", None).unwrap();
        assert!(resumed);
        assert_eq!(state.next_page(), 8);
        assert_eq!(state.failure_count, 1);
        assert_eq!(state.total_pages, Some(20));
    }

    #[test]
    fn test_failed_run_is_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());

        let (mut state, _) = store.begin("book", None).unwrap();
        state.record_page(5, true).unwrap();
        state.fail("capture window closed").unwrap();
        store.save(&state).unwrap();

        let (state, resumed) = store.begin("book", None).unwrap();
        assert!(resumed);
        assert_eq!(state.status, RunStatus::InProgress);
        assert_eq!(state.last_page, 5);
        assert_eq!(state.stop_reason, None);
    }

    #[test]
    fn test_completed_run_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());

        let (mut state, _) = store.begin("book", None).unwrap();
        state.record_page(9, true).unwrap();
        state.complete().unwrap();
        store.save(&state).unwrap();

        let (state, resumed) = store.begin("book", None).unwrap();
        assert!(!resumed);
        assert_eq!(state.last_page, 0);
    }

    #[test]
    fn test_corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        std::fs::write(store.state_path("book").unwrap(), "{not json").unwrap();

        assert!(matches!(
            store.load("book"),
            Err(RunStateError::Corrupt { .. })
        ));
        let (state, resumed) = store.begin("book", None).unwrap();
        assert!(!resumed);
        assert_eq!(state.last_page, 0);
        assert!(store.load("book").unwrap().is_some());
    }

    #[test]
    fn test_job_id_validation() {
        let store = RunStateStore::new("/tmp");
        assert!(store.state_path("../escape").is_err());
        assert!(store.state_path("").is_err());
        assert!(store.state_path("my-book_2").is_ok());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&RunStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }
}
