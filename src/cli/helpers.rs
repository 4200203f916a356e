//! Shared helper functions for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use pagescribe::config::Config;
use pagescribe::ocr::{BackendKind, BackendManager, RecognitionBackend};

/// Load config from an explicit path, or by discovery.
pub async fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::load_from_path(path).await?),
        None => Ok(Config::load().await),
    }
}

/// Progress bar in the house style.
pub fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap()
            .progress_chars("█▓░"),
    );
    pb
}

/// Resolve the backend to use: the named one if given, else the first available.
pub async fn pick_backend(
    manager: &BackendManager,
    name: Option<&str>,
) -> anyhow::Result<Arc<dyn RecognitionBackend>> {
    let Some(name) = name else {
        return manager.select().await.ok_or_else(|| {
            anyhow!(
                "No recognition backend is available. Run `pagescribe backends` for setup hints."
            )
        });
    };

    let kind = BackendKind::from_str(name).ok_or_else(|| {
        anyhow!(
            "Unknown backend '{}' (expected one of: {})",
            name,
            BackendKind::ALL.map(|k| k.as_str()).join(", ")
        )
    })?;
    let backend = manager
        .get(kind)
        .ok_or_else(|| anyhow!("Backend {} is not registered", kind))?;
    if !backend.is_available().await {
        bail!("{} is not available: {}", kind, backend.availability_hint());
    }
    Ok(backend)
}

/// Short availability marker.
pub fn availability_mark(available: bool) -> String {
    if available {
        style("✓").green().to_string()
    } else {
        style("✗").red().to_string()
    }
}

/// Format a USD amount.
pub fn format_cost(usd: f64) -> String {
    if usd == 0.0 {
        "free".to_string()
    } else if usd < 0.01 {
        format!("${:.4}", usd)
    } else {
        format!("${:.2}", usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(0.0), "free");
        assert_eq!(format_cost(0.0025), "$0.0025");
        assert_eq!(format_cost(1.5), "$1.50");
    }
}
