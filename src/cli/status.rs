//! Job checkpoint inspection.

use console::style;

use pagescribe::config::Config;
use pagescribe::run_state::{RunStateStore, RunStatus};
use pagescribe::workflow::read_failure_log;

/// Print the persisted state of a job and its failed pages.
pub async fn cmd_status(config: &Config, job_id: &str) -> anyhow::Result<()> {
    let store = RunStateStore::new(config.state_dir());
    let Some(state) = store.load(job_id)? else {
        println!("{} No checkpoint for {}", style("!").yellow(), job_id);
        return Ok(());
    };

    println!("\n{}", style(format!("Run: {}", state.job_id)).bold());
    println!("{}", "-".repeat(40));

    let status = match state.status {
        RunStatus::Completed => style("Completed").green().to_string(),
        RunStatus::InProgress => style("In progress").yellow().to_string(),
        RunStatus::Failed => style("Failed").red().to_string(),
    };
    println!("{:<16} {}", "Status:", status);
    match state.total_pages {
        Some(total) => println!("{:<16} {} / {}", "Last page:", state.last_page, total),
        None => println!("{:<16} {}", "Last page:", state.last_page),
    }
    println!("{:<16} {}", "Exported:", state.exported_pages);
    println!("{:<16} {}", "Failed pages:", state.failure_count);
    println!(
        "{:<16} {}",
        "Started:",
        state.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(end) = state.end_time {
        println!("{:<16} {}", "Ended:", end.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(reason) = &state.stop_reason {
        println!("{:<16} {}", "Stop reason:", reason);
    }
    if state.status != RunStatus::Completed {
        println!(
            "\n{} Next run resumes at page {}",
            style("→").cyan(),
            state.next_page()
        );
    }

    let log = store.failure_log_path(job_id)?;
    if log.exists() {
        let failures = read_failure_log(&log)?;
        if !failures.is_empty() {
            println!("\n{}", style("Failed images").bold());
            for (path, reason) in &failures {
                println!("  {} {}", path.display(), style(reason).dim());
            }
        }
    }
    Ok(())
}
