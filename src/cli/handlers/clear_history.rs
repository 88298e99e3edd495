// src/cli/handlers/clear_history.rs

use crate::cli::{handlers::commons, session::Session};
use anyhow::Result;
use clap::Parser;
use colored::*;
use dialoguer::{Confirm, theme::ColorfulTheme};

#[derive(Parser, Debug)]
#[command(no_binary_name = true, about = "Deletes every recorded execution.")]
struct ClearHistoryArgs {
    /// Do not ask for confirmation.
    #[arg(long, short)]
    yes: bool,
}

/// The main handler for the `clear-history` command.
pub fn handle(args: Vec<String>, session: &Session) -> Result<()> {
    let clear_args = ClearHistoryArgs::try_parse_from(&args)?;
    let manager = session.manager();

    if !clear_args.yes {
        let size = manager.get_metrics().history_size;
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Delete all {size} history entries?"))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Aborted.".yellow());
            return Ok(());
        }
    }

    let removed = manager.clear_history();
    if session.json() {
        return commons::print_json(&serde_json::json!({ "removed": removed }));
    }
    println!("{} {} entries.", "Removed".green(), removed);
    Ok(())
}
