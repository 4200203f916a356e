//! Checkpointed page workflow: resume, degraded pages and export failures.

mod common;

use std::sync::Arc;

use async_trait::async_trait;

use common::{write_pages, Scripted};
use pagescribe::models::ContentChunk;
use pagescribe::run_state::{RunStateStore, RunStatus};
use pagescribe::workflow::{
    discover_pages, read_failure_log, ChunkSink, PageWorkflow, WorkflowError, WorkflowEvent,
};

/// Accepts pages until `fail_on`, then refuses.
struct FlakySink {
    fail_on: u32,
    accepted: Vec<u32>,
}

#[async_trait]
impl ChunkSink for FlakySink {
    async fn accept(&mut self, chunk: &ContentChunk) -> anyhow::Result<()> {
        if chunk.page == self.fail_on {
            anyhow::bail!("disk full");
        }
        self.accepted.push(chunk.page);
        Ok(())
    }
}

#[tokio::test]
async fn resume_starts_after_last_completed_page() {
    let pages_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_pages(pages_dir.path(), 10);
    let store = RunStateStore::new(state_dir.path());

    // An earlier run got through page 7 before being interrupted
    let (mut state, _) = store.begin("book", Some(10)).unwrap();
    for page in 1..=7 {
        state.record_page(page, true).unwrap();
    }
    store.save(&state).unwrap();

    let backend = Arc::new(Scripted::echo());
    let workflow = PageWorkflow::new(backend.clone(), store.clone());
    let mut chunks: Vec<ContentChunk> = Vec::new();
    let summary = workflow
        .run("book", discover_pages(pages_dir.path()).unwrap(), &mut chunks)
        .await
        .unwrap();

    assert!(summary.resumed);
    assert_eq!(summary.skipped, 7);
    assert_eq!(summary.recognized, 3);
    assert_eq!(backend.calls(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.page).collect::<Vec<_>>(),
        vec![8, 9, 10]
    );
    assert_eq!(chunks[0].text, "text of page-8");

    let saved = store.load("book").unwrap().unwrap();
    assert_eq!(saved.status, RunStatus::Completed);
    assert_eq!(saved.last_page, 10);
    assert_eq!(saved.exported_pages, 10);
    assert!(saved.end_time.is_some());
}

#[tokio::test]
async fn failed_page_yields_empty_text_and_log_entry() {
    let pages_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let paths = write_pages(pages_dir.path(), 5);
    let store = RunStateStore::new(state_dir.path());

    let backend = Arc::new(Scripted::echo().failing_on(&["page-4"]));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let workflow = PageWorkflow::new(backend, store.clone()).with_events(tx);
    let mut chunks: Vec<ContentChunk> = Vec::new();
    let summary = workflow
        .run("book", discover_pages(pages_dir.path()).unwrap(), &mut chunks)
        .await
        .unwrap();
    drop(workflow);

    assert_eq!(chunks.len(), 5);
    assert_eq!(chunks[3].page, 4);
    assert_eq!(chunks[3].text, "");
    assert_eq!(chunks[4].text, "text of page-5");
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.state.failure_count, 1);
    assert_eq!(summary.state.last_page, 5);

    let failures = read_failure_log(&summary.failure_log).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, paths[3]);
    assert!(failures[0].1.contains("unreadable"));

    let mut failed_events = 0;
    while let Some(event) = rx.recv().await {
        if let WorkflowEvent::PageFailed { page, .. } = event {
            assert_eq!(page, 4);
            failed_events += 1;
        }
    }
    assert_eq!(failed_events, 1);
}

#[tokio::test]
async fn export_failure_marks_run_failed_and_is_resumable() {
    let pages_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_pages(pages_dir.path(), 5);
    let store = RunStateStore::new(state_dir.path());
    let backend = Arc::new(Scripted::echo());

    let mut sink = FlakySink {
        fail_on: 3,
        accepted: Vec::new(),
    };
    let err = PageWorkflow::new(backend.clone(), store.clone())
        .run("book", discover_pages(pages_dir.path()).unwrap(), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Export { page: 3, .. }));
    assert_eq!(sink.accepted, vec![1, 2]);

    let saved = store.load("book").unwrap().unwrap();
    assert_eq!(saved.status, RunStatus::Failed);
    assert_eq!(saved.last_page, 3);
    assert!(saved.stop_reason.unwrap().contains("disk full"));

    let mut chunks: Vec<ContentChunk> = Vec::new();
    let summary = PageWorkflow::new(backend.clone(), store.clone())
        .run("book", discover_pages(pages_dir.path()).unwrap(), &mut chunks)
        .await
        .unwrap();
    assert!(summary.resumed);
    assert_eq!(chunks.iter().map(|c| c.page).collect::<Vec<_>>(), vec![4, 5]);
    assert_eq!(backend.calls(), 5);
    assert_eq!(summary.state.status, RunStatus::Completed);
}

#[tokio::test]
async fn completed_run_starts_over() {
    let pages_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_pages(pages_dir.path(), 3);
    let store = RunStateStore::new(state_dir.path());

    let first = Arc::new(Scripted::echo().failing_on(&["page-2"]));
    let mut chunks: Vec<ContentChunk> = Vec::new();
    let summary = PageWorkflow::new(first, store.clone())
        .run("book", discover_pages(pages_dir.path()).unwrap(), &mut chunks)
        .await
        .unwrap();
    assert_eq!(read_failure_log(&summary.failure_log).unwrap().len(), 1);

    let second = Arc::new(Scripted::echo());
    let mut chunks: Vec<ContentChunk> = Vec::new();
    let summary = PageWorkflow::new(second.clone(), store.clone())
        .run("book", discover_pages(pages_dir.path()).unwrap(), &mut chunks)
        .await
        .unwrap();

    assert!(!summary.resumed);
    assert_eq!(second.calls(), 3);
    assert_eq!(summary.state.failure_count, 0);
    assert!(read_failure_log(&summary.failure_log).unwrap().is_empty());
}

#[tokio::test]
async fn geometry_is_used_when_the_backend_supports_it() {
    let pages_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_pages(pages_dir.path(), 2);
    let store = RunStateStore::new(state_dir.path());

    let backend = Arc::new(Scripted::echo().with_geometry());
    let mut chunks: Vec<ContentChunk> = Vec::new();
    PageWorkflow::new(backend.clone(), store.clone())
        .run("geo", discover_pages(pages_dir.path()).unwrap(), &mut chunks)
        .await
        .unwrap();
    assert!(chunks.iter().all(|c| c.has_geometry()));
    assert_eq!(chunks[0].text, "text of page-1");

    let mut plain: Vec<ContentChunk> = Vec::new();
    PageWorkflow::new(backend, store)
        .prefer_geometry(false)
        .run("plain", discover_pages(pages_dir.path()).unwrap(), &mut plain)
        .await
        .unwrap();
    assert!(plain.iter().all(|c| !c.has_geometry()));
}
