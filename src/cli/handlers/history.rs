// src/cli/handlers/history.rs

use crate::cli::{handlers::commons, session::Session};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, about = "Shows past executions, newest first.")]
struct HistoryArgs {
    /// Maximum number of entries to show.
    #[arg(long, short, default_value_t = 20)]
    limit: usize,

    /// Only show commands containing this text (case-insensitive).
    #[arg(long, short)]
    search: Option<String>,
}

/// The main handler for the `history` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let history_args = HistoryArgs::try_parse_from(&args)?;
    let manager = session.manager();
    let entries = match &history_args.search {
        Some(query) => {
            let mut found = manager.search_history(query);
            found.truncate(history_args.limit);
            found
        }
        None => manager.get_history(history_args.limit),
    };

    if session.json() {
        return commons::print_json(&entries);
    }
    if entries.is_empty() {
        println!("{}", "No executions recorded.".dimmed());
        return Ok(());
    }
    for entry in &entries {
        let outcome = if entry.timed_out {
            "timeout".red().bold()
        } else {
            match entry.exit_code {
                Some(0) => "ok".green(),
                Some(code) => format!("exit {code}").red(),
                None => "failed".yellow(),
            }
        };
        let duration = entry
            .duration_ms
            .map(commons::format_duration)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>14}  {:<8}  {:>9}  {:<10}  {}",
            commons::format_age(entry.timestamp_ms).dimmed(),
            outcome,
            duration,
            entry.shell.to_string(),
            commons::truncate(&entry.command, 70)
        );
    }
    Ok(())
}
