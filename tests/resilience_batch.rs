//! Retry, circuit breaker and batch behavior against a scripted backend.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{write_pages, Scripted};
use pagescribe::batch::{BatchError, BatchOptions, BatchOrchestrator, NOT_FOUND_REASON};
use pagescribe::ocr::{FailureKind, OcrError};
use pagescribe::resilience::{BreakerConfig, CircuitStatus, ResilientBackend, RetryPolicy};

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn breaker(threshold: u32, cooldown: Duration) -> BreakerConfig {
    BreakerConfig {
        failure_threshold: threshold,
        cooldown,
    }
}

#[tokio::test]
async fn five_failures_open_the_circuit() {
    let backend = Arc::new(Scripted::failing(FailureKind::Transient));
    let resilient = ResilientBackend::new(
        backend.clone(),
        RetryPolicy::none(),
        breaker(5, Duration::from_secs(60)),
    );
    let image = PathBuf::from("page-1.png");

    for _ in 0..5 {
        let err = resilient.call(&image, false).await.unwrap_err();
        assert!(matches!(err, OcrError::RecognitionFailed { .. }));
    }
    assert_eq!(resilient.circuit().await.status, CircuitStatus::Open);

    let err = resilient.call(&image, false).await.unwrap_err();
    match err {
        OcrError::CircuitOpen { retry_in, .. } => {
            assert!(retry_in > Duration::from_secs(50));
        }
        other => panic!("expected CircuitOpen, got {:?}", other),
    }
    // The rejected call never reached the backend
    assert_eq!(backend.calls(), 5);

    let stats = resilient.stats().await;
    assert_eq!(stats.total_requests, 6);
    assert_eq!(stats.failed_requests, 6);
    assert_eq!(stats.error_categories.get("circuit_open"), Some(&1));
    assert_eq!(stats.error_categories.get("transient"), Some(&5));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let backend = Arc::new(Scripted::echo().fail_first(2, FailureKind::RateLimited));
    let resilient = ResilientBackend::new(
        backend.clone(),
        fast_retries(3),
        breaker(5, Duration::from_secs(60)),
    );

    let result = resilient.call(&PathBuf::from("page-1.png"), false).await.unwrap();
    assert_eq!(result.text, "text of page-1");
    assert_eq!(backend.calls(), 3);

    let stats = resilient.stats().await;
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.retried_requests, 1);
    assert_eq!(stats.total_retries, 1);
    assert_eq!(stats.retry_attempts, 2);
    assert_eq!(resilient.circuit().await.status, CircuitStatus::Closed);
}

#[tokio::test]
async fn fatal_failures_are_not_retried() {
    let backend = Arc::new(Scripted::failing(FailureKind::Quota));
    let resilient = ResilientBackend::new(
        backend.clone(),
        fast_retries(3),
        breaker(5, Duration::from_secs(60)),
    );

    let err = resilient.call(&PathBuf::from("page-1.png"), false).await.unwrap_err();
    assert!(matches!(
        err,
        OcrError::RecognitionFailed {
            kind: FailureKind::Quota,
            ..
        }
    ));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn half_open_admits_a_single_call() {
    let backend = Arc::new(
        Scripted::failing(FailureKind::Transient).with_delay(Duration::from_millis(100)),
    );
    let resilient = ResilientBackend::new(
        backend.clone(),
        RetryPolicy::none(),
        breaker(1, Duration::from_millis(50)),
    );
    let image = PathBuf::from("page-1.png");

    assert!(resilient.call(&image, false).await.is_err());
    assert_eq!(resilient.circuit().await.status, CircuitStatus::Open);

    backend.recover();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let calls = (0..5).map(|_| resilient.call(&image, false));
    let outcomes = futures::future::join_all(calls).await;

    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(OcrError::CircuitOpen { .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 4);
    // One failing call plus the single half-open call
    assert_eq!(backend.calls(), 2);
    assert_eq!(resilient.circuit().await.status, CircuitStatus::Closed);
}

#[tokio::test]
async fn cancelled_half_open_call_frees_the_slot() {
    let backend = Arc::new(
        Scripted::failing(FailureKind::Transient).with_delay(Duration::from_millis(50)),
    );
    let resilient = ResilientBackend::new(
        backend.clone(),
        RetryPolicy::none(),
        breaker(1, Duration::from_millis(20)),
    );
    let image = PathBuf::from("page-1.png");

    assert!(resilient.call(&image, false).await.is_err());
    assert_eq!(resilient.circuit().await.status, CircuitStatus::Open);

    backend.recover();
    tokio::time::sleep(Duration::from_millis(40)).await;

    // Admitted half-open, then dropped before the backend answers
    let cancelled =
        tokio::time::timeout(Duration::from_millis(10), resilient.call(&image, false)).await;
    assert!(cancelled.is_err());
    assert_eq!(backend.calls(), 2);
    assert_eq!(resilient.circuit().await.status, CircuitStatus::HalfOpen);

    let result = resilient.call(&image, false).await.unwrap();
    assert_eq!(result.text, "text of page-1");
    assert_eq!(backend.calls(), 3);
    assert_eq!(resilient.circuit().await.status, CircuitStatus::Closed);
}

#[tokio::test]
async fn batch_records_missing_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = write_pages(dir.path(), 2);
    paths.insert(1, dir.path().join("missing.png"));

    let backend = Arc::new(Scripted::echo());
    let resilient = Arc::new(ResilientBackend::new(
        backend.clone(),
        RetryPolicy::none(),
        BreakerConfig::default(),
    ));
    let result = BatchOrchestrator::new(resilient, BatchOptions::default())
        .run(&paths)
        .await
        .unwrap();

    assert_eq!(result.stats.total, 3);
    assert_eq!(result.stats.successful, 2);
    assert_eq!(result.stats.failed, 1);
    assert_eq!(result.failures[0].path, dir.path().join("missing.png"));
    assert_eq!(result.failures[0].error, NOT_FOUND_REASON);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn batch_respects_concurrency_limit() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_pages(dir.path(), 8);

    let backend = Arc::new(Scripted::echo().with_delay(Duration::from_millis(20)));
    let resilient = Arc::new(ResilientBackend::new(
        backend.clone(),
        RetryPolicy::none(),
        BreakerConfig::default(),
    ));
    let options = BatchOptions {
        concurrency: 3,
        ..Default::default()
    };
    let result = BatchOrchestrator::new(resilient, options)
        .run(&paths)
        .await
        .unwrap();

    assert_eq!(result.stats.successful, 8);
    let peak = backend.peak.load(std::sync::atomic::Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {}", peak);
}

#[tokio::test]
async fn batch_stops_on_error_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_pages(dir.path(), 3);

    let resilient = Arc::new(ResilientBackend::new(
        Arc::new(Scripted::failing(FailureKind::Auth)),
        RetryPolicy::none(),
        BreakerConfig::default(),
    ));
    let options = BatchOptions {
        concurrency: 1,
        continue_on_error: false,
        ..Default::default()
    };
    let err = BatchOrchestrator::new(resilient, options)
        .run(&paths)
        .await
        .unwrap_err();

    match err {
        BatchError::Aborted { path, source } => {
            assert_eq!(path, paths[0]);
            assert_eq!(source.category(), "auth");
        }
    }
}

#[tokio::test]
async fn batch_keeps_going_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_pages(dir.path(), 4);

    let resilient = Arc::new(ResilientBackend::new(
        Arc::new(Scripted::echo().failing_on(&["page-2"])),
        RetryPolicy::none(),
        BreakerConfig::default(),
    ));
    let result = BatchOrchestrator::new(resilient, BatchOptions::default())
        .run(&paths)
        .await
        .unwrap();

    assert_eq!(result.stats.successful, 3);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].category, "parse");
}
