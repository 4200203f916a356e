//! Shared utilities for process-based backends.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;

use super::backend::{FailureKind, OcrError};

/// Check if a binary is available in PATH (or is a direct path that exists).
pub fn check_binary(name: &Path) -> bool {
    resolve_binary(name).is_some()
}

/// Resolve a binary name or path to an executable location.
pub fn resolve_binary(name: &Path) -> Option<PathBuf> {
    if name.components().count() > 1 {
        return name.is_file().then(|| name.to_path_buf());
    }
    which::which(name).ok()
}

/// Run a recognizer subprocess and return its stdout as UTF-8.
///
/// A missing executable maps to `BackendUnavailable`; a non-zero exit maps to a
/// classified `RecognitionFailed` built from stderr.
pub async fn run_recognizer(
    command: &mut Command,
    display_name: &str,
    install_hint: &str,
) -> Result<String, OcrError> {
    let output = command.kill_on_drop(true).output().await;

    match output {
        Ok(output) => stdout_or_failure(output, display_name),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::BackendUnavailable(
            format!("{} not found ({})", display_name, install_hint),
        )),
        Err(e) => Err(OcrError::Io(e)),
    }
}

fn stdout_or_failure(output: Output, display_name: &str) -> Result<String, OcrError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let kind = match FailureKind::from_message(stderr) {
        // A local process is never rate limited
        FailureKind::Transient | FailureKind::RateLimited => FailureKind::Transient,
        other => other,
    };
    Err(OcrError::failed(
        kind,
        format!("{} failed ({}): {}", display_name, output.status, stderr),
    ))
}
