// src/cli/handlers/kill.rs

use crate::cli::{handlers::commons, session::Session};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Terminates a background process and all of its descendants."
)]
struct KillArgs {
    /// Pids of the processes to terminate.
    #[arg(required = true)]
    pids: Vec<u32>,
}

/// The main handler for the `kill` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let kill_args = KillArgs::try_parse_from(&args)?;
    let results: Vec<(u32, bool)> = kill_args
        .pids
        .iter()
        .map(|pid| (*pid, session.manager().kill(*pid)))
        .collect();

    if session.json() {
        let rows: Vec<_> = results
            .iter()
            .map(|(pid, killed)| serde_json::json!({ "pid": pid, "killed": killed }))
            .collect();
        return commons::print_json(&rows);
    }
    for (pid, killed) in results {
        if killed {
            println!("{} {}", "Killed".green(), pid);
        } else {
            println!(
                "{}",
                format!("Process {pid} is not a running tracked process.").yellow()
            );
        }
    }
    Ok(())
}
