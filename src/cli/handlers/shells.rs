// src/cli/handlers/shells.rs

use crate::cli::{handlers::commons, session::Session};
use anyhow::Result;
use clap::Parser;
use colored::*;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, about = "Lists the supported shells and where they were found.")]
struct ShellsArgs {
    /// Probe the host again instead of using the cached detection.
    #[arg(long, short)]
    refresh: bool,
}

/// The main handler for the `shells` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let shells_args = ShellsArgs::try_parse_from(&args)?;
    let shells = session.block_on(session.manager().get_available_shells(shells_args.refresh))?;

    if session.json() {
        return commons::print_json(&shells);
    }
    for descriptor in &shells {
        let mark = if descriptor.available {
            "✔".green()
        } else {
            "✘".red()
        };
        let location = descriptor
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "not found".to_string());
        println!(
            "  {} {:<11} {:<45} {}",
            mark,
            descriptor.shell.to_string().bold(),
            location,
            descriptor.version.as_deref().unwrap_or("").dimmed()
        );
    }
    Ok(())
}
