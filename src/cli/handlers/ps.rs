// src/cli/handlers/ps.rs

use crate::{
    cli::{handlers::commons, session::Session},
    models::ProcessStatus,
};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, about = "Lists tracked background processes.")]
struct PsArgs {
    /// Only show processes with this status (running, completed, error, killed, zombie).
    #[arg(long, short, value_parser = commons::parse_status)]
    status: Option<ProcessStatus>,

    /// Drop finished entries from the registry after listing.
    #[arg(long)]
    prune: bool,
}

/// The main handler for the `ps` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let ps_args = PsArgs::try_parse_from(&args)?;
    let manager = session.manager();
    let processes = manager.list_processes(ps_args.status);

    if session.json() {
        commons::print_json(&processes)?;
    } else if processes.is_empty() {
        println!("{}", "No tracked processes.".dimmed());
    } else {
        println!(
            "{:>8}  {:<10}  {:<10}  {:>6}  {:>10}  {}",
            "PID".bold(),
            "STATUS".bold(),
            "SHELL".bold(),
            "EXIT".bold(),
            "STARTED".bold(),
            "COMMAND".bold()
        );
        for process in &processes {
            let exit = process
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:>8}  {:<10}  {:<10}  {:>6}  {:>10}  {}",
                process.pid,
                commons::colored_status(process.status),
                process.shell.to_string(),
                exit,
                commons::format_age(process.start_time_ms),
                commons::truncate(&process.command, 60)
            );
        }
    }

    if ps_args.prune {
        let removed = manager.clear_finished();
        if !session.json() {
            println!("{}", format!("Pruned {removed} finished entries.").dimmed());
        }
    }
    Ok(())
}
