// src/cli/handlers/processes.rs

use crate::cli::{handlers::commons, session::Session};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, about = "Counts tracked processes by status.")]
struct ProcessesArgs {}

/// The main handler for the `processes` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let _ = ProcessesArgs::try_parse_from(&args)?;
    let stats = session.manager().get_process_stats();

    if session.json() {
        return commons::print_json(&stats);
    }
    println!("{} {}", "Tracked:".bold(), stats.total);
    println!("  {:<10} {}", "running".cyan(), stats.running);
    println!("  {:<10} {}", "completed".green(), stats.completed);
    println!("  {:<10} {}", "error".red(), stats.error);
    println!("  {:<10} {}", "killed".yellow(), stats.killed);
    println!("  {:<10} {}", "zombie".magenta(), stats.zombie);
    Ok(())
}
