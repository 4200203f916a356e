//! Backend availability report.

use console::style;

use pagescribe::config::Config;
use pagescribe::ocr::BackendManager;

use super::helpers::{availability_mark, format_cost};

/// List registered backends in preference order with availability and cost.
pub async fn cmd_backends(config: &Config, pages: usize) -> anyhow::Result<()> {
    let manager = BackendManager::from_settings(&config.ocr);
    let mut statuses = manager.status(pages).await;
    statuses.sort_by_key(|s| {
        manager
            .order()
            .iter()
            .position(|k| *k == s.kind)
            .unwrap_or(usize::MAX)
    });

    println!("\n{}", style("Recognition Backends").bold());
    println!("{}", "-".repeat(60));

    for status in &statuses {
        let preferred = match manager.order().iter().position(|k| *k == status.kind) {
            Some(rank) => format!("#{}", rank + 1),
            None => style("unused").dim().to_string(),
        };
        let mut traits = Vec::new();
        if status.capabilities.supports_geometry {
            traits.push("word boxes");
        }
        if status.capabilities.is_free {
            traits.push("free");
        }

        println!(
            "{} {} {:<7} {:<22} {} for {} pages",
            availability_mark(status.available),
            style(format!("{:<10}", status.kind.as_str())).cyan(),
            preferred,
            traits.join(", "),
            format_cost(status.estimated_cost),
            pages
        );
        if !status.available {
            println!("    {}", style(&status.hint).dim());
        }
    }

    if !statuses.iter().any(|s| s.available) {
        println!(
            "\n{} No backend is available; see the hints above",
            style("!").yellow()
        );
    }
    Ok(())
}
